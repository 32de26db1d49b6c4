//! Declarative plugin descriptors.
//!
//! A plugin is a TOML file describing one HTTP probe: which fingerprints it
//! applies to, how to shape the request, how to read the result back out of
//! the response. Descriptors are immutable once loaded.

use crate::error::{PluginError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,

    /// Compatibility requirements. An empty field places no constraint on
    /// that axis; a descriptor with all three empty matches no target.
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub technology: String,
    #[serde(default)]
    pub language: String,

    /// Static request headers, sent verbatim on every probe.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub method: String,
    /// Probe request timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    pub payloads: Vec<PayloadDescriptor>,
    pub matchers: MatcherSpec,
}

fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadDescriptor {
    pub name: String,
    #[serde(default)]
    pub command_placeholder: String,
    #[serde(default)]
    pub json_template: String,
    #[serde(default)]
    pub multipart_form_data: Vec<MultipartPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultipartPart {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatcherSpec {
    /// Response header to read the result from.
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub extract_regex: String,
    #[serde(default)]
    pub decode_url: bool,
    #[serde(default)]
    pub decode_pipes: bool,
}

impl MatcherSpec {
    /// Compiles the extraction pattern, enforcing the exactly-one-capture-
    /// group contract at load time rather than at match time.
    pub fn compile(&self) -> Result<Regex> {
        let pattern = Regex::new(&self.extract_regex)
            .map_err(|e| PluginError::Config(format!("extract_regex does not compile: {e}")))?;
        // captures_len counts the implicit whole-match group
        if pattern.captures_len() != 2 {
            return Err(PluginError::Config(format!(
                "extract_regex must contain exactly one capture group, found {}",
                pattern.captures_len() - 1
            )));
        }
        Ok(pattern)
    }
}

impl PluginDescriptor {
    /// Reads and validates a descriptor file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let descriptor: PluginDescriptor = toml::from_str(&content)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PluginError::Config("plugin name must not be empty".into()));
        }
        if reqwest::Method::from_bytes(self.method.as_bytes()).is_err()
            || self.method.trim().is_empty()
        {
            return Err(PluginError::Config(format!(
                "invalid request method {:?}",
                self.method
            )));
        }
        if self.timeout == 0 {
            return Err(PluginError::Config("timeout must be at least 1 second".into()));
        }
        if self.payloads.is_empty() {
            return Err(PluginError::Config("at least one payload is required".into()));
        }
        if self.matchers.name.trim().is_empty() {
            return Err(PluginError::Config("matcher header name must not be empty".into()));
        }
        self.matchers.compile()?;
        Ok(())
    }

    /// Whether any compatibility requirement is declared at all.
    pub fn has_requirements(&self) -> bool {
        requirement(&self.framework).is_some()
            || requirement(&self.technology).is_some()
            || requirement(&self.language).is_some()
    }
}

/// Normalises a requirement field: empty means the axis is unconstrained.
pub fn requirement(field: &str) -> Option<&str> {
    let trimmed = field.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
