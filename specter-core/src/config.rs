//! Scan configuration. Loaded (or defaulted) once at startup and frozen
//! for the lifetime of the scan.

use crate::error::{PluginError, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-host page budget for the crawl (a page count, not link depth).
    pub max_depth: usize,
    /// Number of crawl workers.
    pub concurrency: usize,
    /// Capacity of the crawl work queue and of the detection stream.
    pub queue_size: usize,
    pub plugin_dir: String,
    pub user_agent: String,
    /// Crawl fetch timeout, in seconds.
    pub http_timeout: u64,
    pub blacklist_domains: Vec<String>,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub address: String,
    pub port: u16,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            concurrency: 8,
            queue_size: 256,
            plugin_dir: "plugins".to_string(),
            user_agent: "Specter/1.0".to_string(),
            http_timeout: 10,
            blacklist_domains: [
                "google.com",
                "facebook.com",
                "twitter.com",
                "linkedin.com",
                "github.com",
                "instagram.com",
                "youtube.com",
                "wikipedia.org",
                "amazon.com",
                "netflix.com",
                "googletagmanager.com",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            enabled: false,
            kind: "https".to_string(),
        }
    }
}

impl ScanConfig {
    /// Loads configuration from a TOML file. Missing keys keep their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScanConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(PluginError::Config("concurrency must be at least 1".into()));
        }
        if self.queue_size == 0 {
            return Err(PluginError::Config("queue_size must be at least 1".into()));
        }
        if self.http_timeout == 0 {
            return Err(PluginError::Config("http_timeout must be at least 1 second".into()));
        }
        Ok(())
    }
}
