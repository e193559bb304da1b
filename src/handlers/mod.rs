//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `relay` - Telephony media-stream WebSocket bridging to the AI backend

pub mod api;
pub mod relay;

// Re-export commonly used handlers for convenient access
pub use relay::media_stream_handler;
