//! Plain HTTP route configuration.

use axum::{Router, routing::get};

use crate::handlers::api::health_check;
use crate::state::AppState;
use std::sync::Arc;

/// Create the HTTP API router.
///
/// `GET /health` - liveness probe, no authentication
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
