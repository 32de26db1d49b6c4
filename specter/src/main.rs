use anyhow::{Context, bail};
use clap::Parser;
use colored::Colorize;
use specter_core::{PluginDescriptor, PluginEngine, PluginError, ScanConfig};
use specter_scanner::{Crawler, CrawlerOptions, Target};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};
use url::Url;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Fingerprint-gated web vulnerability scanner", long_about = None)]
struct Args {
    /// Seed URL to crawl
    #[arg(short, long)]
    target: Url,

    /// Plugin to execute against every fingerprinted page
    #[arg(short, long)]
    plugin: String,

    /// Directory holding plugin descriptor files
    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Scan configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn print_banner() {
    println!("{}", "  ░ specter ░".purple().bold());
    println!("{}\n", format!("  v{}", env!("CARGO_PKG_VERSION")).dimmed());
}

/// Resolves `<plugin-dir>/<plugin>`, appending `.toml` when the name
/// carries no extension.
fn resolve_plugin_path(plugin_dir: &Path, plugin: &str) -> anyhow::Result<PathBuf> {
    let mut path = plugin_dir.join(plugin);
    if path.extension().is_none() {
        path.set_extension("toml");
    }
    if !path.exists() {
        bail!("plugin {} not found at {}", plugin, path.display());
    }
    if path.is_dir() {
        bail!("{} is a directory, not a plugin descriptor", path.display());
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    print_banner();

    let config = match &args.config {
        Some(path) => ScanConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ScanConfig::default(),
    };

    let plugin_dir = args
        .plugin_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.plugin_dir));
    let plugin_path = resolve_plugin_path(&plugin_dir, &args.plugin)?;
    let descriptor = PluginDescriptor::load(&plugin_path)
        .with_context(|| format!("failed to load plugin {}", plugin_path.display()))?;
    let engine = PluginEngine::new(descriptor, &config).context("failed to build plugin engine")?;
    println!(
        "{} Loaded plugin {} ({})",
        "✓".green().bold(),
        engine.descriptor().name.bold(),
        engine.descriptor().severity.as_str()
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout))
        .build()
        .context("failed to build crawl client")?;
    let crawler = Crawler::new(
        client,
        CrawlerOptions {
            max_depth: config.max_depth,
            user_agent: config.user_agent.clone(),
            blacklist_domains: config.blacklist_domains.clone(),
            queue_size: config.queue_size,
            workers: config.concurrency,
        },
    )?;

    println!(
        "{} Crawling {} with {} workers\n",
        "→".yellow().bold(),
        args.target.as_str().bold(),
        config.concurrency
    );

    let (detections_tx, mut detections_rx) = mpsc::channel(config.queue_size);
    let seed = Target::new(args.target.clone());
    let crawl = tokio::spawn(async move { crawler.crawl(vec![seed], detections_tx).await });

    let mut probed = 0usize;
    let mut hits = 0usize;
    while let Some(detection) = detections_rx.recv().await {
        probed += 1;
        match engine.execute(&detection).await {
            Ok(result) => {
                hits += 1;
                println!("{} {}", "✓".green().bold(), detection.url);
                for line in result.lines() {
                    println!("    {}", line.green());
                }
            }
            Err(PluginError::Incompatible { url }) => {
                warn!("plugin not applicable to {}", url);
            }
            Err(PluginError::Extraction(e)) => {
                warn!("{}: {}", detection.url, e);
            }
            Err(e) => {
                error!("{}: {}", detection.url, e);
            }
        }
    }

    crawl.await.context("crawl task panicked")??;

    println!(
        "\n{} Scan complete: {} pages probed, {} positive",
        "✓".green().bold(),
        probed,
        hits
    );
    Ok(())
}
