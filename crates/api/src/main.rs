use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use tillpoint_api::app::{build_app, services};
use tillpoint_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    tillpoint_observability::init(config.log_format);

    let services = Arc::new(services::build_services(&config).await?);
    let app = build_app(services);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
