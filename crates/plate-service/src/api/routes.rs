use crate::state::{ServiceState, SessionError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine as _;
use common::frames::{BestPlatesResponse, PlateView, SessionStartRequest, VideoFrame};
use common::plates::PlateRecord;
use serde::Deserialize;
use serde_json::json;
use std::io::Cursor;

#[derive(Debug, Default, Deserialize)]
pub struct PlatesQuery {
    /// Defaults to the configured best-plate limit
    pub limit: Option<usize>,

    /// Attach each plate's crop as base64 PNG
    #[serde(default)]
    pub include_crops: bool,
}

fn error_response(err: SessionError) -> Response {
    let status = match &err {
        SessionError::NoSession | SessionError::Busy | SessionError::CaptureStopped => {
            StatusCode::CONFLICT
        }
        SessionError::InvalidFrame(_) => StatusCode::BAD_REQUEST,
        SessionError::Inference(_) => StatusCode::BAD_GATEWAY,
        SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::debug!("Request rejected: {}", err);
    }

    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn plate_view(record: PlateRecord, include_crops: bool) -> PlateView {
    let crop_png_base64 = match (&record.crop, include_crops) {
        (Some(crop), true) => {
            let mut png = Vec::new();
            match crop.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png) {
                Ok(()) => Some(base64::prelude::BASE64_STANDARD.encode(png)),
                Err(e) => {
                    tracing::warn!(plate_id = %record.id, "Failed to encode plate crop: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    PlateView {
        record,
        crop_png_base64,
    }
}

/// Start a new recognition session, discarding the previous one
pub async fn start_session(
    State(state): State<ServiceState>,
    Json(request): Json<SessionStartRequest>,
) -> impl IntoResponse {
    match state.start_session(request.mode) {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get_session(State(state): State<ServiceState>) -> impl IntoResponse {
    match state.session_info() {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => error_response(e),
    }
}

/// End the session and clear its plates
pub async fn end_session(State(state): State<ServiceState>) -> impl IntoResponse {
    match state.end_session() {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Submit a frame to the active session
pub async fn submit_frame(
    State(state): State<ServiceState>,
    Json(frame): Json<VideoFrame>,
) -> impl IntoResponse {
    match state.process_frame(frame).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Best plate per cluster, ranked by occurrences then confidence
pub async fn best_plates(
    State(state): State<ServiceState>,
    Query(query): Query<PlatesQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(state.config().aggregator.best_limit);

    match state.best_detections(limit) {
        Ok(records) => {
            let plates = records
                .into_iter()
                .map(|record| plate_view(record, query.include_crops))
                .collect();
            (StatusCode::OK, Json(BestPlatesResponse { plates })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Get a single stored reading
pub async fn get_plate(
    State(state): State<ServiceState>,
    Path(plate_id): Path<String>,
    Query(query): Query<PlatesQuery>,
) -> impl IntoResponse {
    match state.record(&plate_id) {
        Ok(Some(record)) => {
            (StatusCode::OK, Json(plate_view(record, query.include_crops))).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("Plate '{}' not found", plate_id)
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list_clusters(State(state): State<ServiceState>) -> impl IntoResponse {
    match state.clusters() {
        Ok(clusters) => (StatusCode::OK, Json(json!({ "clusters": clusters }))).into_response(),
        Err(e) => error_response(e),
    }
}

/// Health check endpoint
pub async fn healthz(State(state): State<ServiceState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "plate-service",
            "node_id": state.node_id()
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<ServiceState>) -> impl IntoResponse {
    let engine = state.engine().read().await.info();

    if state.ready().await {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "engine": engine
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "engine": engine
            })),
        )
    }
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> impl IntoResponse {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = telemetry::metrics::REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s.into_response(),
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to convert metrics").into_response()
        }
    }
}
