//! Plugin execution engine.
//!
//! `execute` runs one probe against one fingerprinted target as a linear
//! state machine: compatibility gate, payload construction, request
//! dispatch, result extraction. Any stage's failure is terminal for that
//! target; nothing is retried.

use crate::config::ScanConfig;
use crate::context::{ExecutionContext, MULTIPART_BOUNDARY, render};
use crate::error::{ExtractionError, PluginError, Result};
use crate::plugin::{PluginDescriptor, requirement};
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response};
use specter_scanner::DetectionResult;
use std::time::Duration;
use tracing::{debug, info};

enum Stage {
    CheckCompatibility,
    BuildPayload,
    SendRequest { body: Vec<u8> },
    ExtractResult { response: Response },
    Completed { result: String },
}

pub struct PluginEngine {
    descriptor: PluginDescriptor,
    matcher: Regex,
    method: Method,
    client: Client,
}

impl PluginEngine {
    /// Builds the engine and its HTTP transport. When a proxy is
    /// configured, certificate verification is disabled for this transport:
    /// interception proxies present their own certificates, and routing
    /// through one is an explicit opt-in to that.
    pub fn new(descriptor: PluginDescriptor, config: &ScanConfig) -> Result<Self> {
        descriptor.validate()?;
        let matcher = descriptor.matchers.compile()?;
        let method = Method::from_bytes(descriptor.method.as_bytes())
            .map_err(|_| PluginError::Config(format!("invalid request method {:?}", descriptor.method)))?;

        let mut builder = Client::builder().timeout(Duration::from_secs(descriptor.timeout));
        if config.proxy.enabled {
            let proxy_address = format!("http://{}:{}", config.proxy.address, config.proxy.port);
            info!("routing probes through proxy {}", proxy_address);
            builder = builder
                .proxy(reqwest::Proxy::all(&proxy_address)?)
                .danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;

        Ok(Self {
            descriptor,
            matcher,
            method,
            client,
        })
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Runs the probe against one target. On success, returns the value
    /// extracted from the probe response.
    pub async fn execute(&self, target: &DetectionResult) -> Result<String> {
        info!(
            "executing plugin {} against {}",
            self.descriptor.name, target.url
        );

        // One context per invocation; never engine state.
        let mut context = ExecutionContext::for_payload(&self.descriptor.payloads[0]);
        let mut stage = Stage::CheckCompatibility;

        loop {
            stage = match stage {
                Stage::CheckCompatibility => {
                    if !self.is_compatible(target) {
                        return Err(PluginError::Incompatible {
                            url: target.url.clone(),
                        });
                    }
                    Stage::BuildPayload
                }
                Stage::BuildPayload => Stage::SendRequest {
                    body: self.build_payload(&mut context)?,
                },
                Stage::SendRequest { body } => Stage::ExtractResult {
                    response: self.send_request(target.url.as_str(), body).await?,
                },
                Stage::ExtractResult { response } => Stage::Completed {
                    result: self.extract_result(response.headers())?,
                },
                Stage::Completed { result } => {
                    debug!("plugin {} extracted result", self.descriptor.name);
                    return Ok(result);
                }
            };
        }
    }

    /// Compatibility gate. A descriptor declaring no requirements matches
    /// nothing: absence of requirements never means universal
    /// applicability. Each declared axis must match case-insensitively;
    /// an empty field leaves its axis unconstrained.
    fn is_compatible(&self, target: &DetectionResult) -> bool {
        if !self.descriptor.has_requirements() {
            return false;
        }

        let axes = [
            (requirement(&self.descriptor.framework), &target.frameworks),
            (requirement(&self.descriptor.technology), &target.technologies),
            (requirement(&self.descriptor.language), &target.languages),
        ];

        axes.iter().all(|(declared, observed)| match declared {
            None => true,
            Some(wanted) => observed.iter().any(|item| item.eq_ignore_ascii_case(wanted)),
        })
    }

    /// Renders the first payload into a multipart request body. Multiple
    /// payloads are representable in a descriptor, but only the first
    /// executes per call.
    pub fn build_payload(&self, context: &mut ExecutionContext) -> Result<Vec<u8>> {
        let payload = &self.descriptor.payloads[0];

        context.json = render(&payload.json_template, context)?;

        let mut body = String::new();
        for part in &payload.multipart_form_data {
            let content = render(&part.content, context)?;
            body.push_str("--");
            body.push_str(MULTIPART_BOUNDARY);
            body.push_str("\r\n");
            body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n",
                part.name
            ));
            body.push_str("\r\n");
            body.push_str(&content);
            body.push_str("\r\n");
        }
        body.push_str("--");
        body.push_str(MULTIPART_BOUNDARY);
        body.push_str("--\r\n");

        Ok(body.into_bytes())
    }

    async fn send_request(&self, target_url: &str, body: Vec<u8>) -> Result<Response> {
        let mut request = self
            .client
            .request(self.method.clone(), target_url)
            .body(body);
        for (key, value) in &self.descriptor.headers {
            request = request.header(key, value);
        }
        Ok(request.send().await?)
    }

    /// Reads the matcher's named header and applies the extraction pattern.
    /// The pattern carries exactly one capture group (enforced at load);
    /// a missing header or a non-matching value is a hard failure.
    fn extract_result(&self, headers: &HeaderMap) -> Result<String> {
        let name = &self.descriptor.matchers.name;
        let value = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ExtractionError::MissingHeader { name: name.clone() })?;

        let captured = self
            .matcher
            .captures(value)
            .and_then(|captures| captures.get(1))
            .ok_or_else(|| ExtractionError::NoMatch { name: name.clone() })?;

        let mut result = captured.as_str().to_string();
        if self.descriptor.matchers.decode_url {
            result = query_unescape(&result);
        }
        if self.descriptor.matchers.decode_pipes {
            result = result.replace(" | ", "\n");
        }
        Ok(result)
    }
}

/// Query-string unescape: `+` is a space, percent-escapes are decoded.
/// A value containing a malformed escape (or decoding to invalid UTF-8)
/// is returned untouched, `+` included.
fn query_unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let malformed = bytes.iter().enumerate().any(|(i, byte)| {
        *byte == b'%'
            && !bytes
                .get(i + 1..i + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit))
    });
    if malformed {
        return value.to_string();
    }
    match percent_decode_str(&value.replace('+', " ")).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => value.to_string(),
    }
}
