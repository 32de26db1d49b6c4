//! Per-invocation execution context and template rendering.
//!
//! Payload templates are rendered against exactly these fields and nothing
//! else; the renderer runs in strict mode, so a reference to anything
//! outside the context is a build failure, not an empty substitution.

use crate::error::Result;
use crate::plugin::PayloadDescriptor;
use handlebars::Handlebars;
use serde::Serialize;
use std::sync::LazyLock;
use uuid::Uuid;

/// The multipart boundary token, fixed for the engine's whole lifetime.
/// Existing plugin payloads embed this literal in their templates, so it is
/// deliberately not randomised per request.
pub const MULTIPART_BOUNDARY: &str = "----WebKitFormBoundaryx8jO2oVc6SWP3Sad";

/// Template variables for one `execute` call. Constructed fresh per call
/// and never stored on the engine: concurrent executions must not share
/// one of these.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionContext {
    pub command: String,
    pub escaped_command: String,
    pub boundary: String,
    pub request_id: String,
    pub json: String,
    pub result: String,
}

impl ExecutionContext {
    pub fn for_payload(payload: &PayloadDescriptor) -> Self {
        let command = payload.command_placeholder.clone();
        Self {
            escaped_command: escape_json(&command),
            command,
            boundary: MULTIPART_BOUNDARY.to_string(),
            request_id: Uuid::new_v4().to_string(),
            json: String::new(),
            result: String::new(),
        }
    }
}

static RENDERER: LazyLock<Handlebars<'static>> = LazyLock::new(|| {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    // Payloads are wire bytes, not HTML
    registry.register_escape_fn(handlebars::no_escape);
    registry
});

/// Renders one template string against the context fields.
pub fn render(template: &str, context: &ExecutionContext) -> Result<String> {
    Ok(RENDERER.render_template(template, context)?)
}

/// Escapes a command for embedding inside a JSON string literal.
fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
