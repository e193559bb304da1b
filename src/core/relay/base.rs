//! Shared types for the telephony <-> AI backend relay.
//!
//! This module defines the error taxonomy, audio format identifiers, and the
//! stream-restart policy used by the relay session and its socket adapters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while operating a relay session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection to the AI backend failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication with the AI backend failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Backend-reported error event
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

// =============================================================================
// Audio Formats
// =============================================================================

/// Audio format identifiers understood by the AI backend.
///
/// The inbound leg is a telephone media stream, so 8kHz G.711 u-law is the
/// default on both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// G.711 u-law (8-bit, 8kHz) — telephony native (default)
    #[default]
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law (8-bit, 8kHz)
    #[serde(rename = "g711_alaw")]
    G711Alaw,
    /// PCM 16-bit signed little-endian (24kHz)
    Pcm16,
}

impl AudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
            Self::Pcm16 => "pcm16",
        }
    }

    /// Get the sample rate for this format.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::G711Ulaw | Self::G711Alaw => 8000,
            Self::Pcm16 => 24000,
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "g711_ulaw" | "ulaw" | "mulaw" => Self::G711Ulaw,
            "g711_alaw" | "alaw" => Self::G711Alaw,
            "pcm16" | "pcm" | "linear16" => Self::Pcm16,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Stream Restart Policy
// =============================================================================

/// What a `start` frame on an already-running session does to pending
/// playback state.
///
/// A telephony stream restart (call re-answered, media bridged to a new leg)
/// always resets the media clock and the response-start anchor. Whether it
/// should also discard the outstanding mark queue and the last assistant item
/// id depends on the deployment: preserving them keeps a bridged reconnect
/// able to truncate in-flight assistant audio, resetting them treats every
/// restart as a fresh call leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRestartPolicy {
    /// Keep the mark queue and last assistant item across a restart (default)
    #[default]
    PreservePlayback,
    /// Clear mark queue and last assistant item together with the clock reset
    ResetPlayback,
}

impl StreamRestartPolicy {
    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "preserve" | "preserve_playback" => Self::PreservePlayback,
            "reset" | "reset_playback" => Self::ResetPlayback,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for StreamRestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreservePlayback => write!(f, "preserve_playback"),
            Self::ResetPlayback => write!(f, "reset_playback"),
        }
    }
}
