//! Telephony media-stream WebSocket route configuration
//!
//! This module configures the WebSocket endpoint the telephony side dials
//! into to bridge a live call to the AI backend.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media-stream WebSocket router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for a telephony media stream
///
/// # Protocol
///
/// After the upgrade the telephony side sends JSON frames:
/// 1. `{"event":"start","start":{"streamSid":"..."}}` when the stream opens
/// 2. `{"event":"media","media":{"payload":"<base64>","timestamp":<ms>}}`
///    for each audio chunk
/// 3. `{"event":"mark","mark":{"name":"..."}}` acknowledging playback marks
///
/// The gateway responds with `media`, `mark`, and `clear` frames carrying
/// the same `streamSid`.
///
/// # Authentication
///
/// Uses the same auth middleware as REST endpoints; WebSocket clients that
/// cannot set headers may pass `?token=<secret>`.
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
