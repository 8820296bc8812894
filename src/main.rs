//! Financial News Intelligence Service — Binary Entrypoint
//! Boots the Axum HTTP server with the pipeline, query engine, and metrics
//! exporter wired from environment settings.

use std::net::SocketAddr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use finnews_intel::api::{build_state, create_router, Dependencies};
use finnews_intel::config::Settings;
use finnews_intel::metrics::Metrics;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("finnews_intel=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env();
    tracing::info!(
        dedup_threshold = settings.dedup_threshold,
        port = settings.api_port,
        "starting service"
    );

    let metrics = Metrics::init(&settings);

    let state = build_state(&settings, Dependencies::from_env());
    let router = create_router(state).merge(metrics.router());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
