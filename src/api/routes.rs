use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    // Outermost first: the request ID exists before the trace span is opened
    let layers = ServiceBuilder::new()
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .nest("/api", api_routes())
        .layer(layers)
        .with_state(state)
}

/// Routes under /api
fn api_routes() -> Router<AppState> {
    Router::new()
        // Recommendations
        .route("/recommendations", post(handlers::recommendations))
        .route("/validate-id", post(handlers::validate_id))
        // Rating history
        .route("/user_ratings", post(handlers::user_ratings))
        // Catalog browsing
        .route("/genres", get(handlers::genres))
        .route("/movies", get(handlers::movies_by_genre))
}
