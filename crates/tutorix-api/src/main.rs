//! Tutorix API Server
//!
//! Usage:
//!   tutorix-api
//!   tutorix-api --config tutorix.toml

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tutorix_api::{create_router, state::AppState};
use tutorix_core::config::{AppConfig, LoggingConfig};

#[derive(Parser)]
#[command(name = "tutorix-api")]
#[command(about = "Tutorix authentication and token lifecycle service")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tutorix_api={level},tutorix_core={level},audit=info,tower_http=debug",
            level = logging.level
        ))
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };

    init_tracing(&config.logging);

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Fails when the default role is missing from the role catalog
    let state = Arc::new(AppState::from_config(config).await?);
    tracing::info!(
        storage = state.storage.as_str(),
        confirmation_mode = ?state.auth.confirmation_mode(),
        "Application state initialised"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Tutorix API Server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
