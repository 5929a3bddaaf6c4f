//! REST API handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lanwake_core::ServiceError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::state::{AppState, RequestError};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    succeeded: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<Vec<FailedEntry>>,
}

#[derive(Serialize)]
struct FailedEntry {
    hardware_address: String,
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>, kind: &'static str) -> Self {
        Self {
            error: msg.into(),
            kind,
            succeeded: None,
            failed: None,
        }
    }
}

fn status_for(err: &RequestError) -> StatusCode {
    match err {
        RequestError::Service(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
        RequestError::Service(ServiceError::ScanUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map a failed request to a status code and error body
fn error_response(err: RequestError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "Request failed");
    }

    let body = match &err {
        RequestError::Service(service_err @ ServiceError::PartialReconciliation(partial)) => {
            ApiError {
                error: service_err.to_string(),
                kind: service_err.kind(),
                succeeded: Some(
                    partial
                        .succeeded
                        .iter()
                        .map(|hw| hw.to_string())
                        .collect(),
                ),
                failed: Some(
                    partial
                        .failed
                        .iter()
                        .map(|f| FailedEntry {
                            hardware_address: f.hardware_address.to_string(),
                            error: f.error.to_string(),
                        })
                        .collect(),
                ),
            }
        }
        RequestError::Service(service_err) => {
            ApiError::new(service_err.to_string(), service_err.kind())
        }
        RequestError::Task(_) => ApiError::new(err.to_string(), "internal"),
    };

    (status, Json(body)).into_response()
}

/// Wake request body
#[derive(Deserialize)]
pub struct WakeRequest {
    pub mac_address: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Send a wake signal
pub async fn wake(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WakeRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            let body = ApiError::new(rejection.body_text(), "validation");
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    info!(mac_address = %req.mac_address, "Wake requested");

    match state.wake(req.mac_address, req.ip_address, req.port).await {
        Ok(_) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Query parameters for listing devices
#[derive(Deserialize)]
pub struct ListQuery {
    /// Skip the scan and return stored records only
    #[serde(default)]
    pub from_database: bool,
}

/// List devices, scanning first unless `from_database=true`
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match state.list_devices(query.from_database).await {
        Ok(devices) => Json(serde_json::json!({
            "success": true,
            "devices": devices,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Get a specific device by hardware address
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(hardware_address): Path<String>,
) -> impl IntoResponse {
    match state.find_device(hardware_address).await {
        Ok(Some(device)) => Json(device).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found", "not_found")),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Trigger a discovery scan
pub async fn trigger_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual scan triggered");

    match state.scan().await {
        Ok(summary) => Json(serde_json::json!({
            "success": true,
            "summary": summary,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}
