//! Telephony media-stream WebSocket handler.
//!
//! Hosts one relay session per accepted telephony connection. The session
//! model is an event loop per connection: one task owns the
//! [`RelaySession`] and drives it from a `select!` over the telephony
//! socket and the backend event stream, so all session mutation is
//! serialized without a lock. A separate sender task drains outbound
//! telephony frames so a slow telephony reader never stalls the loop.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::relay::{
    RelaySession, SESSION_CHANNEL_CAPACITY, TelephonyEvent, TelephonyFrame,
};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Maximum WebSocket frame size. Telephony media frames are tiny; 1 MB is
/// generous headroom.
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size.
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How often the loop checks whether the connection went stale.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum idle time before a stale connection is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Telephony media-stream WebSocket handler.
///
/// Upgrades the HTTP connection and hosts a relay session bridging the
/// telephony stream to the AI backend for the lifetime of the socket.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    info!("Telephony WebSocket connection upgrade requested");

    let ip = client_ip.map(|Extension(ClientIp(ip))| ip);
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            handle_media_stream_socket(socket, state.clone()).await;
            if let Some(ip) = ip {
                state.release_connection(ip);
            }
        })
}

/// Drain outbound telephony frames into the socket. Sends a close frame
/// once the channel drops, so tearing down the session closes the socket.
async fn run_telephony_sender(
    mut sender: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<TelephonyFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize telephony frame: {}", e);
                continue;
            }
        };
        if let Err(e) = sender.send(Message::Text(json.into())).await {
            error!("Failed to send telephony frame: {}", e);
            break;
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

/// Host one relay session on an upgraded telephony socket.
async fn handle_media_stream_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Telephony WebSocket connection established");

    let (ws_sender, mut ws_receiver) = socket.split();
    let (frame_tx, frame_rx) = mpsc::channel::<TelephonyFrame>(SESSION_CHANNEL_CAPACITY);
    let sender_task = tokio::spawn(run_telephony_sender(ws_sender, frame_rx));

    // The backend socket lives exactly as long as this session; a failed
    // dial means the call cannot proceed at all.
    let mut backend = match state.backend_connector().connect().await {
        Ok(connection) => connection,
        Err(e) => {
            error!("Failed to connect to AI backend: {}", e);
            drop(frame_tx);
            let _ = sender_task.await;
            return;
        }
    };

    let mut session = RelaySession::new(
        state.config.session_options(),
        frame_tx,
        backend.commands(),
    );

    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg = ws_receiver.next() => {
                last_activity = std::time::Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<TelephonyEvent>(&text) {
                            Ok(event) => session.handle_telephony_event(event),
                            Err(e) => {
                                // Malformed frames are dropped, never fatal
                                warn!("Failed to parse telephony frame: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary telephony frame");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("Telephony connection closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Telephony WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("Telephony WebSocket stream ended");
                        break;
                    }
                }
            }

            event = backend.next_event() => {
                match event {
                    Some(event) => {
                        last_activity = std::time::Instant::now();
                        session.handle_backend_event(event);
                    }
                    None => {
                        info!("Backend socket closed, ending session");
                        break;
                    }
                }
            }

            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        "Connection idle for {}s, closing stale session",
                        last_activity.elapsed().as_secs()
                    );
                    break;
                }
                debug!("Idle check - session still active");
            }
        }
    }

    // Closing either socket closes the other: dropping the session drops
    // the frame channel (sender task closes the telephony socket), and the
    // backend connection is shut down with a bounded grace period.
    drop(session);
    backend.close().await;
    let _ = sender_task.await;

    info!("Relay session terminated");
}
