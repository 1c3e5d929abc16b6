use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::api::{AppState, SharedState, api_router};
use crate::config::MailConfig;
use crate::db::{DbHandle, TaskifyDb};
use crate::mailer::{DisabledMailer, Mailer, SmtpMailer};
use crate::sweep::ReminderSweep;

/// Configuration for the Taskify server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3030,
            db_path: std::path::PathBuf::from("taskify.db"),
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api_router().with_state(state)
}

/// Start the Taskify server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    // Ensure parent directory exists for DB
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = DbHandle::new(
        TaskifyDb::new(&config.db_path).context("Failed to initialize database")?,
    );

    let mailer: Arc<dyn Mailer> = match MailConfig::from_env() {
        Ok(mail) => {
            Arc::new(SmtpMailer::new(&mail).context("Failed to build SMTP transport")?)
        }
        Err(e) => {
            warn!(
                target: "server",
                reason = %format!("{:#}", e),
                "SMTP not configured; reminder delivery will fail until it is"
            );
            Arc::new(DisabledMailer)
        }
    };

    let sweep = Arc::new(ReminderSweep::new(db.clone(), mailer));
    let state = Arc::new(AppState {
        db,
        sweep: Arc::clone(&sweep),
    });

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(target: "server", %local_addr, "Taskify running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweep.stop();
    info!(target: "server", "Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!(target: "server", "Shutting down");
}
