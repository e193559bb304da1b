//! Telephony media-stream frame types.
//!
//! One JSON object per WebSocket text frame, discriminated by the `event`
//! field. The telephony side identifies the stream with a `streamSid`
//! assigned in the `start` frame; every outbound frame echoes it back.
//!
//! Inbound frames (telephony -> relay):
//! - start - stream opened, carries the stream identifier
//! - media - one chunk of caller audio (base64 payload + media clock)
//! - mark  - acknowledgement that queued playback reached a named marker
//! - stop  - stream ended
//!
//! Outbound frames (relay -> telephony):
//! - media - one chunk of assistant audio for playback
//! - mark  - marker to be echoed back once playback reaches it
//! - clear - discard any buffered, not-yet-played audio

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Inbound Frames
// =============================================================================

/// Frames arriving from the telephony socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// Stream opened
    Start {
        /// Start metadata
        start: StreamStart,
    },

    /// Caller audio chunk
    Media {
        /// Media payload and clock
        media: MediaFrame,
    },

    /// Playback marker acknowledgement
    Mark {
        /// Acknowledged marker
        mark: MarkFrame,
    },

    /// Stream ended
    Stop,

    /// Any event kind the relay does not act on
    #[serde(other)]
    Other,
}

/// Metadata carried by a `start` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamStart {
    /// Stream identifier assigned by the telephony side
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
}

/// One chunk of caller audio.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFrame {
    /// Base64-encoded audio, forwarded to the backend unmodified
    pub payload: String,
    /// Media clock position in milliseconds; some vendors quote the integer
    #[serde(deserialize_with = "timestamp_ms")]
    pub timestamp: u64,
}

/// Acknowledged playback marker.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkFrame {
    /// Marker name, as previously sent by the relay
    pub name: String,
}

/// Accept the media timestamp as either a JSON integer or a quoted integer.
fn timestamp_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse::<u64>().map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// Frames sent to the telephony socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyFrame {
    /// Assistant audio chunk for playback
    Media {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Audio payload
        media: MediaPayload,
    },

    /// Playback marker; echoed back as a `mark` event once reached
    Mark {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Marker to round-trip
        mark: MarkPayload,
    },

    /// Discard buffered, not-yet-played audio
    Clear {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Outbound audio payload.
#[derive(Debug, Clone, Serialize)]
pub struct MediaPayload {
    /// Base64-encoded audio
    pub payload: String,
}

/// Outbound marker payload.
#[derive(Debug, Clone, Serialize)]
pub struct MarkPayload {
    /// Marker name
    pub name: String,
}

impl TelephonyFrame {
    /// Build an outbound media frame.
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        TelephonyFrame::Media {
            stream_sid: stream_sid.into(),
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }

    /// Build an outbound mark frame.
    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        TelephonyFrame::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkPayload { name: name.into() },
        }
    }

    /// Build a clear-stream frame.
    pub fn clear(stream_sid: impl Into<String>) -> Self {
        TelephonyFrame::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    /// The stream identifier this frame targets.
    pub fn stream_sid(&self) -> &str {
        match self {
            TelephonyFrame::Media { stream_sid, .. }
            | TelephonyFrame::Mark { stream_sid, .. }
            | TelephonyFrame::Clear { stream_sid } => stream_sid,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
