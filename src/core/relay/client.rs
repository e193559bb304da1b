//! AI backend socket connector.
//!
//! The relay treats the backend as an opaque duplex channel: typed commands
//! go in, typed events come out. [`BackendConnector`] is the injection seam
//! for that channel — the production implementation speaks the realtime
//! WebSocket protocol over tokio-tungstenite, tests substitute plain channel
//! pairs via [`BackendConnection::from_channels`].
//!
//! There is no reconnection here. A closed backend socket ends the session;
//! a new session gets a new connection.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::backend::{BackendCommand, BackendEvent, BackendSessionConfig};
use super::base::{AudioFormat, RelayError, RelayResult};

/// Default realtime backend endpoint.
pub const DEFAULT_BACKEND_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default realtime backend model.
pub const DEFAULT_BACKEND_MODEL: &str = "gpt-4o-realtime-preview";

/// Channel capacity for backend command/event channels.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on flushing and closing the socket during teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the AI backend socket.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// WebSocket endpoint (ws:// or wss://)
    pub url: String,
    /// API key for authentication
    pub api_key: String,
    /// Model to request
    pub model: String,
    /// Voice for audio output
    pub voice: Option<String>,
    /// System instructions for the assistant
    pub instructions: Option<String>,
    /// Response modalities (defaults to text + audio)
    pub modalities: Option<Vec<String>>,
    /// Audio format for both legs
    pub audio_format: AudioFormat,
    /// Temperature for response generation
    pub temperature: Option<f32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_BACKEND_MODEL.to_string(),
            voice: None,
            instructions: None,
            modalities: None,
            audio_format: AudioFormat::default(),
            temperature: None,
        }
    }
}

impl BackendConfig {
    /// Build the WebSocket URL with the model parameter.
    pub fn ws_url(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }

    /// Build the session-open configuration record.
    pub fn session_config(&self) -> BackendSessionConfig {
        let mut session = BackendSessionConfig::telephony(self.audio_format);
        session.voice = self.voice.clone();
        session.instructions = self.instructions.clone();
        session.temperature = self.temperature;
        if let Some(modalities) = self.modalities.clone() {
            session.modalities = Some(modalities);
        }
        session
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A live backend socket: command sender, event receiver, io task.
///
/// Dropping the connection aborts the io task; [`BackendConnection::close`]
/// shuts it down with a bounded grace period instead.
pub struct BackendConnection {
    commands: mpsc::Sender<BackendCommand>,
    events: mpsc::Receiver<BackendEvent>,
    cancel: CancellationToken,
    io_task: Option<JoinHandle<()>>,
}

impl BackendConnection {
    /// Wrap bare channel halves, with no io task behind them. This is the
    /// test seam: a fake backend holds the other halves.
    pub fn from_channels(
        commands: mpsc::Sender<BackendCommand>,
        events: mpsc::Receiver<BackendEvent>,
    ) -> Self {
        Self {
            commands,
            events,
            cancel: CancellationToken::new(),
            io_task: None,
        }
    }

    /// Clone the command sender for injection into a session.
    pub fn commands(&self) -> mpsc::Sender<BackendCommand> {
        self.commands.clone()
    }

    /// Receive the next backend event. Returns `None` once the socket has
    /// closed and all buffered events are drained. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<BackendEvent> {
        self.events.recv().await
    }

    /// Close the socket, waiting up to the grace period for the io task to
    /// flush and exit before aborting it.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.io_task.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err()
        {
            tracing::warn!("Backend io task did not exit in time, aborting");
            task.abort();
        }
    }
}

impl Drop for BackendConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Factory for backend connections. The session host depends on this trait,
/// never on a concrete transport.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Open the backend socket and complete the session-open handshake.
    async fn connect(&self) -> RelayResult<BackendConnection>;
}

/// Production connector speaking the realtime WebSocket protocol.
pub struct RealtimeBackendConnector {
    config: BackendConfig,
}

impl RealtimeBackendConnector {
    /// Create a connector, validating the configuration.
    pub fn new(config: BackendConfig) -> RelayResult<Self> {
        if config.api_key.is_empty() {
            return Err(RelayError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        // Fail on an unparseable endpoint now rather than at call time
        host_header(&config.ws_url())?;
        Ok(Self { config })
    }

    /// The configured backend settings.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

/// Derive the Host header value (host, plus port when non-default) from the
/// configured endpoint.
fn host_header(ws_url: &str) -> RelayResult<String> {
    let parsed = url::Url::parse(ws_url)
        .map_err(|e| RelayError::InvalidConfiguration(format!("invalid backend URL: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(RelayError::InvalidConfiguration(format!(
                "backend URL must be ws:// or wss://, got {other}://"
            )));
        }
    }
    let host = parsed.host_str().ok_or_else(|| {
        RelayError::InvalidConfiguration("backend URL has no host".to_string())
    })?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[async_trait]
impl BackendConnector for RealtimeBackendConnector {
    async fn connect(&self) -> RelayResult<BackendConnection> {
        let ws_url = self.config.ws_url();
        let host = host_header(&ws_url)?;

        let request = http::Request::builder()
            .uri(&ws_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RelayError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RelayError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = %self.config.url, model = %self.config.model, "Connected to AI backend");

        let (mut ws_sink, mut ws_source) = ws_stream.split();

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<BackendCommand>(WS_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<BackendEvent>(WS_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let io_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }

                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&cmd) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize backend command: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send backend command: {}", e);
                            break;
                        }
                    }

                    msg = ws_source.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<BackendEvent>(&text) {
                                    Ok(event) => {
                                        if event_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse backend event: {} - {}", e, text);
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                tracing::info!("Backend closed the socket");
                                break;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Err(e)) => {
                                tracing::error!("Backend socket error: {}", e);
                                break;
                            }
                            None => break,
                            _ => {}
                        }
                    }
                }
            }
            // event_tx drops here; the session loop observes the close
            tracing::debug!("Backend io task ended");
        });

        // Session-open configuration, sent exactly once
        cmd_tx
            .send(BackendCommand::SessionUpdate {
                session: self.config.session_config(),
            })
            .await
            .map_err(|e| RelayError::WebSocketError(e.to_string()))?;

        Ok(BackendConnection {
            commands: cmd_tx,
            events: event_rx,
            cancel,
            io_task: Some(io_task),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
