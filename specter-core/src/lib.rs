pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod plugin;

pub use config::{ProxyConfig, ScanConfig};
pub use context::{ExecutionContext, MULTIPART_BOUNDARY};
pub use engine::PluginEngine;
pub use error::{ExtractionError, PluginError};
pub use plugin::{MatcherSpec, MultipartPart, PayloadDescriptor, PluginDescriptor, Severity};
