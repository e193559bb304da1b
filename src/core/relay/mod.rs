//! Telephony <-> AI backend relay module.
//!
//! This module implements the realtime audio relay: a per-connection session
//! bridging a telephony media stream (chunked, base64-encoded, timestamped
//! frames over a persistent socket) with a speech-to-speech AI backend
//! socket, with correct interruption semantics.
//!
//! # Architecture
//!
//! - [`telephony`] and [`backend`] define the wire shapes on each socket
//! - [`client`] opens and drives the backend socket; the
//!   [`BackendConnector`] trait is the dependency-injection seam
//! - [`session`] holds the [`RelaySession`] state machine: mark-queue
//!   bookkeeping, the barge-in truncation algorithm, and stream restarts
//!
//! Both sockets feed typed events into the session from a single task per
//! connection, so state mutation needs no lock and the barge-in reset is
//! trivially atomic.
//!
//! # Audio
//!
//! Audio payloads stay base64 text end-to-end; the relay never transcodes.
//! The phone leg and the backend are configured to the same format
//! (G.711 u-law at 8kHz by default).

mod backend;
mod base;
mod client;
mod session;
mod telephony;

pub use backend::{
    BackendApiError, BackendCommand, BackendEvent, BackendSessionConfig, ContentPart,
    ConversationItem, ResponseSummary, SessionInfo, TurnDetection,
};
pub use base::{AudioFormat, RelayError, RelayResult, StreamRestartPolicy};
pub use client::{
    BackendConfig, BackendConnection, BackendConnector, DEFAULT_BACKEND_MODEL,
    DEFAULT_BACKEND_URL, RealtimeBackendConnector,
};
pub use session::{RelaySession, SESSION_CHANNEL_CAPACITY, SessionOptions};
pub use telephony::{
    MarkFrame, MarkPayload, MediaFrame, MediaPayload, StreamStart, TelephonyEvent, TelephonyFrame,
};
