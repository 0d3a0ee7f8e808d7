pub mod routes;

use crate::state::ServiceState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn router(state: ServiceState) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Session endpoints
        .route(
            "/v1/session",
            get(routes::get_session)
                .post(routes::start_session)
                .delete(routes::end_session),
        )
        .route("/v1/frames", post(routes::submit_frame))
        // Plate endpoints
        .route("/v1/plates", get(routes::best_plates))
        .route("/v1/plates/:id", get(routes::get_plate))
        .route("/v1/clusters", get(routes::list_clusters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
