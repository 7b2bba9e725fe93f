use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use caseboard::config::Config;
use caseboard::server;

#[derive(Parser)]
#[command(name = "caseboard")]
#[command(version, about = "Helpdesk and project tracking server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (overrides CASEBOARD_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path (overrides CASEBOARD_DB)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Voice-note storage directory (overrides CASEBOARD_STORAGE_DIR)
        #[arg(long)]
        storage_dir: Option<PathBuf>,

        /// Bind on all interfaces and allow cross-origin requests
        #[arg(long)]
        dev: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "caseboard=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            port,
            db_path,
            storage_dir,
            dev,
        } => {
            let mut config = Config::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            if let Some(storage_dir) = storage_dir {
                config.storage_dir = storage_dir;
            }
            config.dev_mode = dev;
            server::start_server(config).await?;
        }
    }
    Ok(())
}
