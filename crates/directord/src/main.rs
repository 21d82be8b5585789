//! directord — the Director daemon.
//!
//! Single binary that assembles the formation service:
//! - Configuration (TOML file plus CLI overrides)
//! - State store (redb, on disk or in memory)
//! - Director facade (deletion guard, visibility resolver)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! directord serve --port 3000 --data-dir /var/lib/director --config director.toml
//! directord config   # print the effective configuration
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use director_core::DirectorConfig;
use director_formation::Director;
use director_state::StateStore;
use tracing::info;

#[derive(Parser)]
#[command(name = "directord", about = "Director formation daemon")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep all state in memory; nothing survives a restart.
        #[arg(long)]
        in_memory: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,directord=debug,director=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            in_memory,
        } => serve(config, port, data_dir, in_memory).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DirectorConfig> {
    match path {
        Some(path) => {
            let config = DirectorConfig::from_file(path)?;
            info!(?path, "configuration loaded");
            Ok(config)
        }
        None => Ok(DirectorConfig::default()),
    }
}

async fn serve(
    mut config: DirectorConfig,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    in_memory: bool,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(data_dir) = data_dir {
        config.server.data_dir = data_dir;
    }
    info!("Director daemon starting");

    let store = if in_memory {
        info!("using in-memory state store");
        StateStore::open_in_memory()?
    } else {
        std::fs::create_dir_all(&config.server.data_dir)?;
        let db_path = config.server.data_dir.join("director.redb");
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");
        store
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let director = Director::new(store, config);
    let router = director_api::build_router(director);

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Director daemon stopped");
    Ok(())
}
