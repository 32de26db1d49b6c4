use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("failed to read plugin descriptor: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse plugin descriptor: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid plugin descriptor: {0}")]
    Config(String),

    #[error("payload build failed: {0}")]
    Build(#[from] handlebars::RenderError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("target {url} is not compatible with this plugin")]
    Incompatible { url: Url },

    #[error("result extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("response header {name} not found")]
    MissingHeader { name: String },

    #[error("pattern captured no value from header {name}")]
    NoMatch { name: String },
}

pub type Result<T> = std::result::Result<T, PluginError>;
