//! Worker scope harness for SwKit.
//!
//! Provides commands for:
//! - Validating a worker configuration file
//! - Driving a configured scope through its lifecycle and sample requests
//!
//! ## Usage
//!
//! ```bash
//! # Validate a configuration
//! sw-harness check sample-config.json
//!
//! # Install, activate, and replay some requests offline
//! sw-harness run sample-config.json --offline \
//!     --navigate /app/deep/link --request /favicon.png
//!
//! # Send a lifecycle message before fetching
//! sw-harness run sample-config.json --offline \
//!     --message '{"type":"SKIP_WAITING"}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use url::Url;

use swkit_common::{init_logging, LogConfig};
use swkit_routing::{FetchEvent, FetchResponse, Fetcher, HttpFetcher, RoutingError};
use swkit_worker::{InProcessHost, WorkerConfig, WorkerScope};

#[derive(Parser)]
#[command(name = "sw-harness")]
#[command(about = "Worker scope harness for SwKit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a worker configuration file
    Check {
        /// Configuration file (JSON)
        config: PathBuf,
    },

    /// Drive a configured scope: install, activate, then replay requests
    Run {
        /// Configuration file (JSON)
        config: PathBuf,

        /// Navigation requests to replay (absolute or root-relative)
        #[arg(long)]
        navigate: Vec<String>,

        /// Sub-resource requests to replay
        #[arg(long)]
        request: Vec<String>,

        /// Lifecycle messages (JSON payloads) to deliver after activation
        #[arg(long)]
        message: Vec<String>,

        /// Serve synthetic responses instead of touching the network
        #[arg(long)]
        offline: bool,
    },
}

/// Offline stand-in for the network.
struct SyntheticFetcher;

#[async_trait]
impl Fetcher for SyntheticFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, RoutingError> {
        let body = format!("synthetic response for {}", url.path());
        Ok(FetchResponse::ok(body.into_bytes()))
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<WorkerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: WorkerConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

fn resolve(origin: &Url, raw: &str) -> anyhow::Result<Url> {
    if raw.starts_with('/') {
        origin
            .join(raw)
            .with_context(|| format!("resolving {raw} against {origin}"))
    } else {
        Url::parse(raw).with_context(|| format!("parsing {raw}"))
    }
}

fn describe(response: &FetchResponse) -> String {
    let source = if response.from_cache { "cache" } else { "network" };
    format!(
        "{} {} ({} bytes, {})",
        response.status,
        response.status_text,
        response.body.len(),
        source
    )
}

fn check(path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&path)?;
    let entry_count = config.precache.len();
    let allow = config.navigation.allow.clone();
    let deny = config.navigation.deny.clone();

    // Building a scope performs all validation: manifest dedup and
    // conflict checks, pattern compilation, shell-URL membership.
    let scope = WorkerScope::new(config, InProcessHost::new(), Arc::new(SyntheticFetcher))?;

    println!("configuration OK");
    println!(
        "  precache: {} entries ({} after dedup) in '{}'",
        entry_count,
        scope.precache().manifest().len(),
        scope.precache().bucket()
    );
    println!("  navigation: allow {allow:?}, deny {deny:?}");
    Ok(())
}

async fn run(
    path: PathBuf,
    navigate: Vec<String>,
    request: Vec<String>,
    message: Vec<String>,
    offline: bool,
) -> anyhow::Result<()> {
    let config = load_config(&path)?;
    let origin = Url::parse(&config.origin).context("parsing config origin")?;

    let fetcher: Arc<dyn Fetcher> = if offline {
        Arc::new(SyntheticFetcher)
    } else {
        Arc::new(HttpFetcher::new()?)
    };

    let host = InProcessHost::new();
    let scope = WorkerScope::new(config, host.clone(), fetcher)?;

    let stats = scope.handle_install().await?;
    println!(
        "install: {} fetched, {} already current",
        stats.updated.len(),
        stats.up_to_date.len()
    );

    scope.handle_activate().await?;
    host.complete_activation().await;
    println!("activate: state={}", host.state().await);

    for raw in message {
        let payload = serde_json::from_str(&raw).with_context(|| format!("parsing {raw}"))?;
        scope.handle_message(payload).await;
        println!("message delivered: {raw}");
    }

    for raw in navigate {
        let url = resolve(&origin, &raw)?;
        let response = scope.handle_fetch(&FetchEvent::navigation(url)).await;
        println!("navigate {raw}: {}", describe(&response));
    }

    for raw in request {
        let url = resolve(&origin, &raw)?;
        let response = scope.handle_fetch(&FetchEvent::subresource(url)).await;
        println!("request {raw}: {}", describe(&response));
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    });

    match cli.command {
        Commands::Check { config } => check(config),
        Commands::Run {
            config,
            navigate,
            request,
            message,
            offline,
        } => run(config, navigate, request, message, offline).await,
    }
}
