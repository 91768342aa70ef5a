pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::address::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Address resolution
        .route("/api/v1/address/search", get(handlers::handle_search))
        .route("/api/v1/address/validate", post(handlers::handle_validate))
        .route(
            "/api/v1/address/coordinates",
            post(handlers::handle_resolve_coordinates),
        )
        // Address persistence
        .route(
            "/api/v1/profiles/:profile_id/address",
            put(handlers::handle_apply_address),
        )
        .route(
            "/api/v1/profiles/:profile_id/address",
            get(handlers::handle_get_addresses),
        )
        .with_state(state)
}
