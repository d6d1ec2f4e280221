//! Tandem sync server.
//!
//! Serves the project collection to dashboards over WebSockets, stores it
//! under the configured data directory and exposes `GET /health`.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use tandem_core::SystemClock;
use tandem_sync::{JsonFileRepository, MemoryRepository, ProjectRepository, SyncServer};

use config::Config;

#[derive(Parser)]
#[command(name = "tandem-server")]
#[command(about = "Real-time project synchronization server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "tandem.toml")]
    config: PathBuf,

    /// WebSocket listen address (overrides config file)
    #[arg(short, long, env = "TANDEM_BIND")]
    bind: Option<String>,

    /// Health endpoint address (overrides config file)
    #[arg(long, env = "TANDEM_HEALTH")]
    health: Option<String>,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "TANDEM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Accept changes from unauthenticated connections
    #[arg(long)]
    open: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let file = Config::load_or_default(&cli.config)?;
    let mut config = file.server_config();

    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(health) = cli.health {
        config.health_addr = Some(health);
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }
    if cli.open {
        config.require_auth = false;
    }

    let authenticator = file.authenticator();
    info!(
        "Tandem server: {} tokens configured, changes {}",
        authenticator.len(),
        if config.require_auth { "require auth" } else { "open" }
    );

    let repo: Arc<dyn ProjectRepository> = match &config.data_dir {
        Some(dir) => {
            info!("Data dir: {}", dir.display());
            Arc::new(JsonFileRepository::new(dir).with_max_backups(config.max_backups))
        }
        None => {
            info!("No data dir configured; projects are kept in memory only");
            Arc::new(MemoryRepository::new())
        }
    };

    let server = SyncServer::with_parts(config, repo, Arc::new(authenticator), Arc::new(SystemClock))?;
    let listener = server.bind().await?;
    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Tandem server stopped");
    Ok(())
}
