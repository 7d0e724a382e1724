use std::sync::Arc;

use realtime_service::auth::{Directory, StaticDirectory};
use realtime_service::bus::EventBus;
use realtime_service::routes::build_router;
use realtime_service::state::AppState;
use realtime_service::{config, error, logging};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let bus = Arc::new(EventBus::new(cfg.replay_capacity, cfg.heartbeat_interval));
    bus.start();

    let directory: Arc<dyn Directory> = match cfg.directory_json.as_deref() {
        Some(json) => Arc::new(StaticDirectory::from_json(json)?),
        None => {
            tracing::warn!("DIRECTORY_JSON not set; every stream request will be rejected");
            Arc::new(StaticDirectory::new())
        }
    };

    let state = AppState {
        bus: Arc::clone(&bus),
        directory,
        config: Arc::clone(&cfg),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    tracing::info!(%bind_addr, "starting realtime-service");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    bus.stop();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    }
}
