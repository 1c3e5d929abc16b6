use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskify::db::TaskifyDb;
use taskify::server::{self, ServerConfig};

#[derive(Parser)]
#[command(name = "taskify")]
#[command(version, about = "Multi-tenant task/project management backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (and host for the reminder sweep)
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "3030")]
        port: u16,

        /// Database path
        #[arg(long, default_value = "taskify.db")]
        db_path: PathBuf,

        /// Enable dev mode (permissive CORS for a local frontend dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and run migrations without serving
    Init {
        /// Database path
        #[arg(long, default_value = "taskify.db")]
        db_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskify=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port, db_path, dev } => {
            server::start_server(ServerConfig {
                port,
                db_path,
                dev_mode: dev,
            })
            .await?;
        }
        Commands::Init { db_path } => {
            if let Some(parent) = db_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
            TaskifyDb::new(&db_path).context("Failed to initialize database")?;
            println!("Database initialized at {}", db_path.display());
        }
    }

    Ok(())
}
