use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use common::config::{load_dotenv, AppConfig};
use common::telemetry::init_tracing;
use connection_service::routes::create_router;
use connection_service::state::AppState;
use connection_service::SERVICE_NAME;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config = AppConfig::load_with_service(SERVICE_NAME);
    init_tracing(config.log_json);

    let state = AppState::new(config.clone()).context("failed to load saved connections")?;
    let registry = state.registry.clone();
    let app = create_router(state);

    let addr = config.bind_address();
    info!(service = SERVICE_NAME, address = %addr, data_dir = %config.data_dir.display(), "Starting service");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Closing active connections");
    registry.disconnect_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
