//! peercache node
//!
//! Serves a set of file-backed cache groups and joins the configured peer
//! ring.
//!
//! ```text
//! peercache --config node.yaml
//! peercache --self-url http://10.0.0.1:8080 \
//!           --peers http://10.0.0.1:8080,http://10.0.0.2:8080
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use peercache::config::{GroupSpec, NodeConfig};
use peercache::group::{FileLoader, GroupRegistry};
use peercache::peers::{HttpTransport, PeerPicker, PeerTransport};
use peercache::ring::default_hash;
use peercache::server::{self, ServerState};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Distributed read-through cache node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "PEERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Server bind address (overrides the config file)
    #[arg(long, env = "PEERCACHE_LISTEN")]
    listen: Option<String>,

    /// This node's base URL as seen by its peers
    #[arg(long, env = "PEERCACHE_SELF_URL")]
    self_url: Option<String>,

    /// Comma-separated base URLs of every ring member
    #[arg(long, env = "PEERCACHE_PEERS", value_delimiter = ',')]
    peers: Option<Vec<String>>,

    /// Serve ./<name> as a group when no groups are configured
    #[arg(long, env = "PEERCACHE_DEFAULT_GROUP", default_value = "files")]
    default_group: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    config.validate().context("Invalid configuration")?;

    info!("Starting peercache {}", peercache::version());
    info!("  Self: {}", config.self_url);
    info!("  Listen: {}", config.listen);
    info!("  Ring members: {}", config.ring_members().len());

    let picker = Arc::new(PeerPicker::with_ring(
        config.self_url.clone(),
        config.replicas,
        default_hash,
    ));
    picker.set_peers(config.ring_members());

    let transport: Arc<dyn PeerTransport> = Arc::new(HttpTransport::new(config.http_config())?);
    let registry = Arc::new(GroupRegistry::new(picker, Some(transport)));

    for spec in &config.groups {
        let root = spec
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&spec.name));
        info!(group = %spec.name, root = %root.display(), "Serving group");
        registry.get_or_create(&spec.name, spec.group_config(), Arc::new(FileLoader::new(root)));
    }

    let listener = server::bind(&config.listen).await?;
    let state = Arc::new(ServerState::new(
        registry,
        &config.base_path,
        config.request_timeout(),
    ));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal.cancel();
        }
    });

    server::serve(listener, state, shutdown).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Merge the config file with command-line overrides
fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => NodeConfig::default(),
    };

    if let Some(listen) = &args.listen {
        config.listen = listen.clone();
    }
    if let Some(self_url) = &args.self_url {
        config.self_url = self_url.clone();
    }
    if let Some(peers) = &args.peers {
        config.peers = peers
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if config.self_url.is_empty() {
        config.self_url = format!("http://{}", config.listen);
    }
    if config.groups.is_empty() {
        config.groups.push(GroupSpec::new(args.default_group.clone()));
    }

    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
