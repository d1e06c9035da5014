//! ask4me server binary.
//!
//! Loads configuration (explicit `--config`, else auto-detected), opens the
//! durable store, wires the hub, notifier, and lifecycle engine, and serves
//! the HTTP surface until the process is stopped. Exits non-zero on
//! configuration or bind failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use ask4me::config;
use ask4me::http::{self, AppState};
use ask4me::hub::EventHub;
use ask4me::lifecycle::Engine;
use ask4me::notify::Notifier;
use ask4me::store::Store;

#[derive(Parser, Debug)]
#[command(author, version, about = "Human-in-the-loop rendezvous service")]
struct Cli {
    /// Config file path (.env or .yml/.yaml). If absent, auto-detect:
    /// ./.env then ./ask4me.yaml and named variants.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (cfg, config_path) = match config::load_auto(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("load config: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!(config = %config_path.display(), "configuration loaded");

    let sqlite_path = PathBuf::from(&cfg.sqlite_path);
    let sqlite_path = std::path::absolute(&sqlite_path).unwrap_or(sqlite_path);
    let store = match Store::open(&sqlite_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("open store {}: {err}", sqlite_path.display());
            return ExitCode::FAILURE;
        }
    };

    let hub = EventHub::new(Duration::from_secs(cfg.terminal_cache_seconds));
    hub.start_sweeper();

    let notifier = Arc::new(Notifier::from_config(&cfg));
    let engine = Engine::new(
        store,
        hub,
        notifier,
        cfg.base_url.clone(),
        cfg.default_expires_in_seconds,
    );
    let state = AppState {
        engine,
        api_key: cfg.api_key.clone(),
        heartbeat_interval: Duration::from_secs(cfg.sse_heartbeat_interval_seconds),
    };
    let router = http::router(state);

    let listener = match TcpListener::bind(cfg.bind_addr()).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("bind {}: {err}", cfg.bind_addr());
            return ExitCode::FAILURE;
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "listening"),
        Err(_) => info!(addr = %cfg.bind_addr(), "listening"),
    }

    if let Err(err) = http::serve(listener, router).await {
        error!(error = %err, "server exited");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
