//! urlscan - score one URL and print the verdict
//!
//! ```bash
//! urlscan https://example.com/
//! urlscan http://login.example.net/verify --html page.html --header 'Server: nginx/1.18'
//! urlscan https://example.com/ --config urlscan.json --policy vote
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sase_urlscan::{AggregationPolicy, Artifact, ContentBundle, ScanConfig, UrlScanner};

#[derive(Parser)]
#[command(name = "urlscan")]
#[command(author = "OpenSASE")]
#[command(version)]
#[command(about = "Multi-signal URL risk scanner", long_about = None)]
struct Cli {
    /// URL to score
    url: String,

    /// Fetched HTML document for the URL
    #[arg(long)]
    html: Option<PathBuf>,

    /// Script body to analyze (repeatable)
    #[arg(long)]
    script: Vec<PathBuf>,

    /// Response header as 'Name: value' (repeatable)
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,

    /// JSON configuration file
    #[arg(long, short, env = "URLSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Aggregation policy: weighted | vote
    #[arg(long)]
    policy: Option<String>,

    /// Pretty-print the verdict
    #[arg(long)]
    pretty: bool,
}

impl Cli {
    fn scan_config(&self) -> anyhow::Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ScanConfig::default(),
        };
        config.apply_env()?;
        if let Some(policy) = &self.policy {
            config.policy = policy.parse::<AggregationPolicy>()?;
        }
        Ok(config)
    }

    fn artifact(&self) -> anyhow::Result<Artifact> {
        if self.html.is_none() && self.script.is_empty() && self.headers.is_empty() {
            return Ok(Artifact::new(&self.url));
        }

        let mut content = ContentBundle::default();
        if let Some(path) = &self.html {
            let html = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            content.html = Some(html);
        }
        for path in &self.script {
            let script = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            content = content.with_script(script);
        }
        for header in &self.headers {
            let (name, value) = header
                .split_once(':')
                .with_context(|| format!("header '{header}' is not 'Name: value'"))?;
            content = content.with_header(name, value.trim());
        }

        Ok(Artifact::with_content(&self.url, content))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.scan_config()?;
    let artifact = cli.artifact()?;

    tracing::debug!("urlscan v{}", env!("CARGO_PKG_VERSION"));
    let scanner = UrlScanner::new(config)?;
    let verdict = scanner.scan(artifact).await?;

    let json = if cli.pretty {
        serde_json::to_string_pretty(&verdict)?
    } else {
        serde_json::to_string(&verdict)?
    };
    println!("{json}");

    Ok(())
}
