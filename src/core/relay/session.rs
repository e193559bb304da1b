//! Per-connection relay session.
//!
//! A [`RelaySession`] bridges one telephony media stream with one AI backend
//! socket. It owns every piece of mutable session state and is driven by
//! exactly one task: the socket-hosting loop feeds decoded telephony frames
//! and backend events into [`RelaySession::handle_telephony_event`] and
//! [`RelaySession::handle_backend_event`], which serializes all mutation
//! without a lock.
//!
//! Outbound I/O goes through two bounded channels injected at construction,
//! one per socket. Sends never block: a full channel drops the frame and
//! logs, so a stalled peer on one socket cannot freeze the other.
//!
//! # Interruption
//!
//! Assistant audio is relayed chunk-by-chunk; each chunk is paired with a
//! `mark` frame whose acknowledgement tells the session how much queued
//! playback the telephony side has drained. When the backend reports the
//! caller speaking while marks are outstanding, the session truncates the
//! in-flight response item at the elapsed position measured on the caller's
//! own media clock and clears the telephony playback buffer. Neither socket
//! needs a native pause primitive for this.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use super::backend::{BackendCommand, BackendEvent};
use super::base::StreamRestartPolicy;
use super::telephony::{TelephonyEvent, TelephonyFrame};

/// Channel capacity for per-session outbound frame channels.
pub const SESSION_CHANNEL_CAPACITY: usize = 1024;

/// Behavioral knobs for a relay session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// What a stream restart does to pending playback state
    pub restart_policy: StreamRestartPolicy,
    /// Opening line sent once the backend reports session-ready
    pub greeting: Option<String>,
}

/// State machine bridging one telephony stream and one AI backend socket.
pub struct RelaySession {
    /// Stream identifier, assigned by the telephony side on `start`
    stream_sid: Option<String>,
    /// Media clock of the most recent inbound media frame
    latest_media_timestamp_ms: u64,
    /// Item id of the backend's in-flight response, if any
    last_assistant_item_id: Option<String>,
    /// Outstanding mark tokens, oldest first
    mark_queue: VecDeque<String>,
    /// Media clock captured when the current response began streaming
    response_start_timestamp_ms: Option<u64>,
    /// Whether the backend completed its handshake
    backend_connected: bool,
    options: SessionOptions,
    telephony_tx: mpsc::Sender<TelephonyFrame>,
    backend_tx: mpsc::Sender<BackendCommand>,
}

impl RelaySession {
    /// Create a session writing to the given outbound channels.
    pub fn new(
        options: SessionOptions,
        telephony_tx: mpsc::Sender<TelephonyFrame>,
        backend_tx: mpsc::Sender<BackendCommand>,
    ) -> Self {
        Self {
            stream_sid: None,
            latest_media_timestamp_ms: 0,
            last_assistant_item_id: None,
            mark_queue: VecDeque::new(),
            response_start_timestamp_ms: None,
            backend_connected: false,
            options,
            telephony_tx,
            backend_tx,
        }
    }

    // -------------------------------------------------------------------------
    // Inbound frame pump
    // -------------------------------------------------------------------------

    /// Dispatch one decoded telephony frame.
    pub fn handle_telephony_event(&mut self, event: TelephonyEvent) {
        match event {
            TelephonyEvent::Start { start } => {
                tracing::info!(stream_sid = %start.stream_sid, "Telephony stream started");
                self.reset_for_new_stream(start.stream_sid);
            }
            TelephonyEvent::Media { media } => {
                self.record_inbound_timestamp(media.timestamp);
                // Payload forwarded unmodified; the backend and the phone leg
                // share an audio format, so no transcoding happens here.
                self.send_backend(BackendCommand::audio_append(media.payload));
            }
            TelephonyEvent::Mark { mark } => {
                tracing::trace!(name = %mark.name, "Mark acknowledged");
                self.acknowledge_mark();
            }
            TelephonyEvent::Stop => {
                tracing::info!(stream_sid = ?self.stream_sid, "Telephony stream stopped");
            }
            TelephonyEvent::Other => {
                tracing::trace!("Unhandled telephony event");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Backend event pump
    // -------------------------------------------------------------------------

    /// Dispatch one decoded backend event.
    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::SessionCreated { session } => {
                tracing::info!(session_id = ?session.id, "Backend session ready");
                self.on_backend_ready();
            }
            BackendEvent::SessionUpdated => {
                tracing::debug!("Backend session configuration acknowledged");
            }
            BackendEvent::AudioDelta { delta, item_id, .. } => {
                self.on_audio_delta(delta, item_id);
            }
            BackendEvent::SpeechStarted { audio_start_ms, .. } => {
                tracing::debug!(audio_start_ms, "Caller speech detected");
                self.handle_barge_in();
            }
            BackendEvent::SpeechStopped { audio_end_ms, .. } => {
                tracing::debug!(audio_end_ms, "Caller speech ended");
            }
            BackendEvent::ResponseDone { response } => {
                tracing::debug!(response_id = ?response.id, status = ?response.status, "Response done");
            }
            BackendEvent::Error { error } => {
                // The backend decides whether to close; the session carries on.
                tracing::error!(%error, "Backend reported an error");
            }
            BackendEvent::Other => {
                tracing::trace!("Unhandled backend event");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Session operations
    // -------------------------------------------------------------------------

    /// Adopt a (re)started telephony stream.
    ///
    /// Always resets the media clock and the response-start anchor; the
    /// restart policy decides whether pending mark/item state survives.
    pub fn reset_for_new_stream(&mut self, stream_sid: impl Into<String>) {
        self.stream_sid = Some(stream_sid.into());
        self.latest_media_timestamp_ms = 0;
        self.response_start_timestamp_ms = None;
        if self.options.restart_policy == StreamRestartPolicy::ResetPlayback {
            self.mark_queue.clear();
            self.last_assistant_item_id = None;
        }
    }

    /// Record the media clock of an inbound media frame.
    pub fn record_inbound_timestamp(&mut self, timestamp_ms: u64) {
        self.latest_media_timestamp_ms = timestamp_ms;
    }

    /// Pop the oldest outstanding mark. Stray acknowledgements after a
    /// truncation reset are expected; popping an empty queue is a no-op.
    pub fn acknowledge_mark(&mut self) {
        self.mark_queue.pop_front();
    }

    /// Mark the backend handshake complete and fire the greeting trigger.
    fn on_backend_ready(&mut self) {
        if self.backend_connected {
            return;
        }
        self.backend_connected = true;
        if let Some(greeting) = self.options.greeting.clone() {
            self.send_backend(BackendCommand::user_text(greeting));
            self.send_backend(BackendCommand::ResponseCreate);
        }
    }

    /// Relay one assistant audio chunk and arm the interruption bookkeeping.
    fn on_audio_delta(&mut self, delta: String, item_id: Option<String>) {
        let Some(stream_sid) = self.stream_sid.clone() else {
            // Audio with no stream to play it on; nothing to anchor either.
            tracing::warn!("Dropping assistant audio: no telephony stream started");
            return;
        };

        self.send_telephony(TelephonyFrame::media(stream_sid.clone(), delta));

        // Anchor the response start to the caller's own media clock, not wall
        // time, so the barge-in elapsed math stays in the caller's domain.
        if self.response_start_timestamp_ms.is_none() {
            self.response_start_timestamp_ms = Some(self.latest_media_timestamp_ms);
        }

        if let Some(id) = item_id {
            self.last_assistant_item_id = Some(id);
        }

        let mark = uuid::Uuid::new_v4().to_string();
        self.mark_queue.push_back(mark.clone());
        self.send_telephony(TelephonyFrame::mark(stream_sid, mark));
    }

    /// Interrupt the in-flight assistant response.
    ///
    /// No-op unless marks are outstanding and a response start is anchored.
    /// Otherwise: truncate the backend item at the elapsed position, clear
    /// the telephony playback buffer, and reset all three pieces of playback
    /// state together.
    pub fn handle_barge_in(&mut self) {
        let Some(response_start) = self.response_start_timestamp_ms else {
            return;
        };
        if self.mark_queue.is_empty() {
            return;
        }

        let elapsed = self.latest_media_timestamp_ms.saturating_sub(response_start);
        tracing::debug!(elapsed_ms = elapsed, "Barge-in: truncating assistant response");

        if let Some(item_id) = self.last_assistant_item_id.take() {
            self.send_backend(BackendCommand::truncate(item_id, elapsed));
        }

        if let Some(stream_sid) = self.stream_sid.clone() {
            self.send_telephony(TelephonyFrame::clear(stream_sid));
        }

        self.mark_queue.clear();
        self.last_assistant_item_id = None;
        self.response_start_timestamp_ms = None;
    }

    // -------------------------------------------------------------------------
    // Outbound sends
    // -------------------------------------------------------------------------

    /// Non-blocking send toward the telephony socket.
    fn send_telephony(&self, frame: TelephonyFrame) {
        match self.telephony_tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Telephony channel full, dropping outbound frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Telephony channel closed, dropping outbound frame");
            }
        }
    }

    /// Non-blocking send toward the AI backend socket.
    fn send_backend(&self, command: BackendCommand) {
        match self.backend_tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Backend channel full, dropping outbound command");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Backend channel closed, dropping outbound command");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Stream identifier, if a stream has started.
    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// Media clock of the most recent inbound media frame.
    pub fn latest_media_timestamp_ms(&self) -> u64 {
        self.latest_media_timestamp_ms
    }

    /// Item id of the in-flight assistant response, if any.
    pub fn last_assistant_item_id(&self) -> Option<&str> {
        self.last_assistant_item_id.as_deref()
    }

    /// Media clock captured when the current response began streaming.
    pub fn response_start_timestamp_ms(&self) -> Option<u64> {
        self.response_start_timestamp_ms
    }

    /// Number of outstanding mark tokens.
    pub fn pending_marks(&self) -> usize {
        self.mark_queue.len()
    }

    /// Whether the backend handshake completed.
    pub fn is_backend_connected(&self) -> bool {
        self.backend_connected
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::relay::backend::SessionInfo;
    use crate::core::relay::telephony::{MarkFrame, MediaFrame, StreamStart};

    fn session_with_channels(
        options: SessionOptions,
    ) -> (
        RelaySession,
        mpsc::Receiver<TelephonyFrame>,
        mpsc::Receiver<BackendCommand>,
    ) {
        let (tel_tx, tel_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (be_tx, be_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        (RelaySession::new(options, tel_tx, be_tx), tel_rx, be_rx)
    }

    fn start_event(sid: &str) -> TelephonyEvent {
        TelephonyEvent::Start {
            start: StreamStart {
                stream_sid: sid.to_string(),
            },
        }
    }

    fn media_event(payload: &str, timestamp: u64) -> TelephonyEvent {
        TelephonyEvent::Media {
            media: MediaFrame {
                payload: payload.to_string(),
                timestamp,
            },
        }
    }

    fn delta_event(delta: &str, item_id: Option<&str>) -> BackendEvent {
        BackendEvent::AudioDelta {
            delta: delta.to_string(),
            item_id: item_id.map(str::to_string),
            response_id: None,
        }
    }

    #[test]
    fn test_start_adopts_stream_and_zeroes_clock() {
        let (mut session, _tel, _be) = session_with_channels(SessionOptions::default());
        session.record_inbound_timestamp(900);
        session.handle_telephony_event(start_event("SD1"));
        assert_eq!(session.stream_sid(), Some("SD1"));
        assert_eq!(session.latest_media_timestamp_ms(), 0);
        assert!(session.response_start_timestamp_ms().is_none());
    }

    #[test]
    fn test_media_records_clock_and_forwards_payload() {
        let (mut session, _tel, mut be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(start_event("SD1"));
        session.handle_telephony_event(media_event("QUJD", 120));

        assert_eq!(session.latest_media_timestamp_ms(), 120);
        match be.try_recv().unwrap() {
            BackendCommand::InputAudioBufferAppend { audio } => assert_eq!(audio, "QUJD"),
            other => panic!("Expected audio append, got {other:?}"),
        }
    }

    #[test]
    fn test_mark_ack_on_empty_queue_is_noop() {
        let (mut session, _tel, _be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(TelephonyEvent::Mark {
            mark: MarkFrame {
                name: "stray".to_string(),
            },
        });
        assert_eq!(session.pending_marks(), 0);
    }

    #[test]
    fn test_audio_delta_emits_media_and_mark() {
        let (mut session, mut tel, _be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(start_event("SD1"));
        session.handle_backend_event(delta_event("AAA", Some("item1")));

        match tel.try_recv().unwrap() {
            TelephonyFrame::Media { stream_sid, media } => {
                assert_eq!(stream_sid, "SD1");
                assert_eq!(media.payload, "AAA");
            }
            other => panic!("Expected media frame, got {other:?}"),
        }
        assert!(matches!(tel.try_recv().unwrap(), TelephonyFrame::Mark { .. }));
        assert_eq!(session.pending_marks(), 1);
        assert_eq!(session.last_assistant_item_id(), Some("item1"));
        assert_eq!(session.response_start_timestamp_ms(), Some(0));
    }

    #[test]
    fn test_audio_delta_without_stream_is_dropped() {
        let (mut session, mut tel, _be) = session_with_channels(SessionOptions::default());
        session.handle_backend_event(delta_event("AAA", Some("item1")));

        assert!(tel.try_recv().is_err());
        assert_eq!(session.pending_marks(), 0);
        assert!(session.response_start_timestamp_ms().is_none());
        assert!(session.last_assistant_item_id().is_none());
    }

    #[test]
    fn test_response_start_anchors_once() {
        let (mut session, _tel, _be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(start_event("SD1"));
        session.handle_telephony_event(media_event("AA", 100));
        session.handle_backend_event(delta_event("AAA", None));
        session.handle_telephony_event(media_event("AA", 250));
        session.handle_backend_event(delta_event("BBB", None));

        // Second delta must not move the anchor
        assert_eq!(session.response_start_timestamp_ms(), Some(100));
        assert_eq!(session.pending_marks(), 2);
    }

    #[test]
    fn test_barge_in_truncates_and_resets() {
        let (mut session, mut tel, mut be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(start_event("SD1"));
        session.handle_telephony_event(media_event("AA", 1000));
        session.handle_backend_event(delta_event("AAA", Some("item1")));
        // Drain the media + mark frames emitted by the delta
        let _ = tel.try_recv().unwrap();
        let _ = tel.try_recv().unwrap();
        let _ = be.try_recv().unwrap();

        session.handle_telephony_event(media_event("AA", 1450));
        let _ = be.try_recv().unwrap();

        session.handle_barge_in();

        match be.try_recv().unwrap() {
            BackendCommand::ConversationItemTruncate {
                item_id,
                content_index,
                audio_end_ms,
            } => {
                assert_eq!(item_id, "item1");
                assert_eq!(content_index, 0);
                assert_eq!(audio_end_ms, 450);
            }
            other => panic!("Expected truncate, got {other:?}"),
        }
        match tel.try_recv().unwrap() {
            TelephonyFrame::Clear { stream_sid } => assert_eq!(stream_sid, "SD1"),
            other => panic!("Expected clear frame, got {other:?}"),
        }
        assert_eq!(session.pending_marks(), 0);
        assert!(session.last_assistant_item_id().is_none());
        assert!(session.response_start_timestamp_ms().is_none());
        // Exactly one truncate and one clear
        assert!(be.try_recv().is_err());
        assert!(tel.try_recv().is_err());
    }

    #[test]
    fn test_barge_in_without_marks_is_noop() {
        let (mut session, mut tel, mut be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(start_event("SD1"));
        session.handle_telephony_event(media_event("AA", 500));
        let _ = be.try_recv().unwrap();

        session.handle_barge_in();

        assert!(tel.try_recv().is_err());
        assert!(be.try_recv().is_err());
        assert_eq!(session.latest_media_timestamp_ms(), 500);
    }

    #[test]
    fn test_barge_in_without_item_id_still_clears_stream() {
        let (mut session, mut tel, mut be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(start_event("SD1"));
        session.handle_telephony_event(media_event("AA", 100));
        session.handle_backend_event(delta_event("AAA", None));
        let _ = tel.try_recv().unwrap();
        let _ = tel.try_recv().unwrap();
        let _ = be.try_recv().unwrap();

        session.handle_barge_in();

        // No item to truncate, but playback is still flushed and state reset
        assert!(be.try_recv().is_err());
        assert!(matches!(
            tel.try_recv().unwrap(),
            TelephonyFrame::Clear { .. }
        ));
        assert_eq!(session.pending_marks(), 0);
    }

    #[test]
    fn test_clock_regression_saturates_elapsed() {
        let (mut session, _tel, mut be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(start_event("SD1"));
        session.handle_telephony_event(media_event("AA", 1000));
        session.handle_backend_event(delta_event("AAA", Some("item1")));
        let _ = be.try_recv().unwrap();
        // Clock goes backwards; elapsed must clamp to zero, not underflow
        session.record_inbound_timestamp(700);

        session.handle_barge_in();

        match be.try_recv().unwrap() {
            BackendCommand::ConversationItemTruncate { audio_end_ms, .. } => {
                assert_eq!(audio_end_ms, 0)
            }
            other => panic!("Expected truncate, got {other:?}"),
        }
    }

    #[test]
    fn test_restart_preserves_playback_state_by_default() {
        let (mut session, _tel, _be) = session_with_channels(SessionOptions::default());
        session.handle_telephony_event(start_event("SD1"));
        session.handle_backend_event(delta_event("AAA", Some("item1")));

        session.handle_telephony_event(start_event("SD2"));

        assert_eq!(session.stream_sid(), Some("SD2"));
        assert_eq!(session.latest_media_timestamp_ms(), 0);
        assert!(session.response_start_timestamp_ms().is_none());
        // Pending truncation state survives a bridged reconnect
        assert_eq!(session.pending_marks(), 1);
        assert_eq!(session.last_assistant_item_id(), Some("item1"));
    }

    #[test]
    fn test_restart_reset_policy_clears_playback_state() {
        let options = SessionOptions {
            restart_policy: StreamRestartPolicy::ResetPlayback,
            ..Default::default()
        };
        let (mut session, _tel, _be) = session_with_channels(options);
        session.handle_telephony_event(start_event("SD1"));
        session.handle_backend_event(delta_event("AAA", Some("item1")));

        session.handle_telephony_event(start_event("SD2"));

        assert_eq!(session.pending_marks(), 0);
        assert!(session.last_assistant_item_id().is_none());
    }

    #[test]
    fn test_backend_ready_sets_flag_once_and_sends_greeting() {
        let options = SessionOptions {
            greeting: Some("Say hello.".to_string()),
            ..Default::default()
        };
        let (mut session, _tel, mut be) = session_with_channels(options);
        assert!(!session.is_backend_connected());

        session.handle_backend_event(BackendEvent::SessionCreated {
            session: SessionInfo::default(),
        });

        assert!(session.is_backend_connected());
        assert!(matches!(
            be.try_recv().unwrap(),
            BackendCommand::ConversationItemCreate { .. }
        ));
        assert!(matches!(
            be.try_recv().unwrap(),
            BackendCommand::ResponseCreate
        ));

        // A duplicate handshake event must not replay the greeting
        session.handle_backend_event(BackendEvent::SessionCreated {
            session: SessionInfo::default(),
        });
        assert!(be.try_recv().is_err());
    }

    #[test]
    fn test_backend_ready_without_greeting_sends_nothing() {
        let (mut session, _tel, mut be) = session_with_channels(SessionOptions::default());
        session.handle_backend_event(BackendEvent::SessionCreated {
            session: SessionInfo::default(),
        });
        assert!(session.is_backend_connected());
        assert!(be.try_recv().is_err());
    }

    #[test]
    fn test_closed_channels_do_not_panic() {
        let (tel_tx, tel_rx) = mpsc::channel(1);
        let (be_tx, be_rx) = mpsc::channel(1);
        drop(tel_rx);
        drop(be_rx);
        let mut session = RelaySession::new(SessionOptions::default(), tel_tx, be_tx);
        session.handle_telephony_event(start_event("SD1"));
        session.handle_telephony_event(media_event("AA", 10));
        session.handle_backend_event(delta_event("AAA", Some("item1")));
        session.handle_barge_in();
    }
}
