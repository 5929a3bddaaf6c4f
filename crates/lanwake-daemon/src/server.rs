//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use lanwake_discovery::BeaconListener;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api;
use crate::collector;
use crate::state::AppState;
use crate::ws;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/wake", post(api::wake))
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{hardware_address}", get(api::get_device))
        .route("/api/scan", post(api::trigger_scan))
        .route("/api/config", get(api::get_config))
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server, plus the beacon collector when enabled
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let beacon = &state.config.beacon;
    if beacon.enabled {
        let listener = BeaconListener::join(beacon.group, beacon.interface, beacon.port).await?;
        let collector_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = collector::run(collector_state, listener).await {
                error!(error = %e, "Beacon collector failed");
            }
        });
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}
