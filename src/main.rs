//! mediahubd - backend daemon for the media library dashboard.
//!
//! Serves the dashboard's HTTP API: the rolling activity log, directory
//! scanning, environment settings, and the interactive organizer scan
//! session with its SSE output stream.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediahubd::{
    api::{self, AppState},
    config::DaemonConfig,
    ledger::{Ledger, LogLevel, LogSource},
    session::ScanSession,
    settings::SettingsStore,
};

/// mediahubd - media library dashboard backend
#[derive(Parser, Debug)]
#[command(name = "mediahubd", version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP API server
    #[arg(long, env = "MEDIAHUBD_BIND", default_value = "127.0.0.1:3001")]
    bind: SocketAddr,

    /// Path to the environment settings file managed by the dashboard
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Path to the daemon config file (optional; defaults apply if absent)
    #[arg(long, default_value = "mediahubd.toml")]
    config: PathBuf,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "mediahubd=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match DaemonConfig::load(&cli.config)? {
        Some(config) => {
            tracing::info!(path = %cli.config.display(), "loaded config file");
            config
        }
        None => DaemonConfig::default(),
    };

    let ledger = Ledger::new();
    ledger.append(
        LogLevel::Info,
        LogSource::System,
        "Media library service started",
        None,
    );

    let state = AppState {
        ledger,
        settings: SettingsStore::new(cli.env_file),
        session: ScanSession::new(config),
    };
    let session = state.session.clone();

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    tracing::info!(addr = %cli.bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received Ctrl+C");
        })
        .await?;

    // Don't leave an orphaned organizer behind.
    session.shutdown();

    tracing::info!("mediahubd exiting");
    Ok(())
}
