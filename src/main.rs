//! Conclave - Multi-agent CLI orchestrator
//!
//! Reads one message per stdin line and answers it with a collaborative turn.

#![forbid(unsafe_code)]

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod config;
mod repl;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conclave=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Conclave v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config()?;
    let app = app::App::build(&config).await?;
    let result = repl::run(&app).await;
    app.shutdown().await;
    result
}
