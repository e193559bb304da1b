//! AI backend WebSocket event types.
//!
//! JSON events discriminated by the `type` field, mirroring the
//! speech-to-speech realtime protocol the relay bridges to.
//!
//! Commands (relay -> backend):
//! - session.update - session-open configuration
//! - input_audio_buffer.append - caller audio chunk (base64, unmodified)
//! - conversation.item.create - seed a conversation item (greeting trigger)
//! - conversation.item.truncate - discard assistant audio past a point
//! - response.create - ask the model to respond
//!
//! Events (backend -> relay):
//! - session.created / session.updated - handshake lifecycle
//! - input_audio_buffer.speech_started / speech_stopped - server VAD
//! - response.audio.delta - assistant audio chunk
//! - response.done - response finished
//! - error - backend-reported failure

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::base::AudioFormat;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session-open configuration, sent once on backend handshake.
///
/// Everything here is externally supplied; the relay never computes any of
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl BackendSessionConfig {
    /// A telephony-ready configuration: both legs in the given format,
    /// server VAD on so the backend reports speech-started events.
    pub fn telephony(format: AudioFormat) -> Self {
        Self {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: None,
            voice: None,
            input_audio_format: Some(format.as_str().to_string()),
            output_audio_format: Some(format.as_str().to_string()),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: None,
                prefix_padding_ms: None,
                silence_duration_ms: None,
            }),
            temperature: None,
        }
    }
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// No turn detection
    #[serde(rename = "none")]
    None {},
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item, as created by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// =============================================================================
// Commands (relay -> backend)
// =============================================================================

/// Commands sent to the AI backend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum BackendCommand {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: BackendSessionConfig,
    },

    /// Append audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Truncate a conversation item at an audio position
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u64,
    },

    /// Ask the model to generate a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl BackendCommand {
    /// Append a base64 payload as-is (the telephony forwarding path).
    pub fn audio_append(payload: impl Into<String>) -> Self {
        BackendCommand::InputAudioBufferAppend {
            audio: payload.into(),
        }
    }

    /// Append raw audio bytes, encoding them on the way out.
    pub fn audio_append_bytes(data: &[u8]) -> Self {
        BackendCommand::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Truncate an in-flight assistant item at `audio_end_ms`.
    pub fn truncate(item_id: impl Into<String>, audio_end_ms: u64) -> Self {
        BackendCommand::ConversationItemTruncate {
            item_id: item_id.into(),
            content_index: 0,
            audio_end_ms,
        }
    }

    /// Create a user text item (used for the greeting trigger).
    pub fn user_text(text: impl Into<String>) -> Self {
        BackendCommand::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: Some("user".to_string()),
                content: Some(vec![ContentPart {
                    content_type: "input_text".to_string(),
                    text: Some(text.into()),
                }]),
            },
        }
    }
}

// =============================================================================
// Events (backend -> relay)
// =============================================================================

/// Events received from the AI backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum BackendEvent {
    /// Session created (handshake complete)
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        #[serde(default)]
        session: SessionInfo,
    },

    /// Session configuration acknowledged
    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// Server VAD detected the caller speaking
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Server VAD detected silence
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Assistant audio chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded audio delta
        delta: String,
        /// Item ID of the in-flight response item
        #[serde(default)]
        item_id: Option<String>,
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Response finished
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response summary
        #[serde(default)]
        response: ResponseSummary,
    },

    /// Backend-reported error
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: BackendApiError,
    },

    /// Any event type the relay does not act on
    #[serde(other)]
    Other,
}

impl BackendEvent {
    /// Decode base64 audio from an AudioDelta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// Session information from the handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    #[serde(default)]
    pub id: Option<String>,
    /// Model backing the session
    #[serde(default)]
    pub model: Option<String>,
}

/// Response summary from a response.done event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseSummary {
    /// Response ID
    #[serde(default)]
    pub id: Option<String>,
    /// Terminal status
    #[serde(default)]
    pub status: Option<String>,
}

/// Backend API error information.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Error code
    #[serde(default)]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for BackendApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.error_type.as_deref().unwrap_or("error"),
            self.message
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
