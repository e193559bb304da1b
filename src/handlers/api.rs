//! Plain HTTP API handlers.

use axum::Json;
use serde_json::{Value, json};

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "callbridge-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
