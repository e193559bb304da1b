//! Mock AI-backend WebSocket server for end-to-end relay tests.
//!
//! Speaks just enough of the realtime protocol to exercise the relay:
//! replies to `session.update` with `session.created`, emits a scripted
//! audio delta and a scripted speech-started event keyed off how many
//! audio appends it has seen, and records every command it receives.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// What the mock does as appends arrive (counts are 1-based).
#[derive(Clone, Copy)]
pub struct MockScript {
    /// Send an audio delta after this many appends
    pub delta_on_append: usize,
    /// Send a speech-started event after this many appends
    pub speech_started_on_append: usize,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            delta_on_append: 1,
            speech_started_on_append: 2,
        }
    }
}

/// A running mock backend accepting one relay connection.
pub struct MockBackend {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    _accept_task: JoinHandle<()>,
}

impl MockBackend {
    /// Bind an ephemeral port and start accepting.
    pub async fn spawn(script: MockScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_for_task = received.clone();

        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let received = received_for_task.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, script, received).await {
                        eprintln!("Mock backend connection error: {e}");
                    }
                });
            }
        });

        Self {
            addr,
            received,
            _accept_task: accept_task,
        }
    }

    /// Endpoint URL for the gateway's backend configuration.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Snapshot of every command received so far.
    pub async fn received(&self) -> Vec<Value> {
        self.received.lock().await.clone()
    }

    /// Wait until a command with the given `type` arrives and return it.
    pub async fn wait_for_command(&self, command_type: &str) -> Value {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                if let Some(found) = self
                    .received
                    .lock()
                    .await
                    .iter()
                    .find(|v| v["type"] == command_type)
                {
                    return found.clone();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {command_type}"))
    }

    /// Assert that no command with the given `type` has been received.
    pub async fn assert_not_received(&self, command_type: &str) {
        assert!(
            !self
                .received
                .lock()
                .await
                .iter()
                .any(|v| v["type"] == command_type),
            "unexpected {command_type} command"
        );
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    script: MockScript,
    received: Arc<Mutex<Vec<Value>>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut append_count = 0usize;

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let command: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let command_type = command["type"].as_str().unwrap_or_default().to_string();
                received.lock().await.push(command);

                match command_type.as_str() {
                    "session.update" => {
                        let created = json!({
                            "type": "session.created",
                            "session": {"id": "sess-mock", "model": "mock-model"},
                        });
                        write.send(Message::Text(created.to_string().into())).await?;
                    }
                    "input_audio_buffer.append" => {
                        append_count += 1;
                        if append_count == script.delta_on_append {
                            let delta = json!({
                                "type": "response.audio.delta",
                                "delta": "QUJD",
                                "item_id": "item-1",
                                "response_id": "resp-1",
                            });
                            write.send(Message::Text(delta.to_string().into())).await?;
                        }
                        if append_count == script.speech_started_on_append {
                            let started = json!({
                                "type": "input_audio_buffer.speech_started",
                                "audio_start_ms": 0,
                                "item_id": "item-user",
                            });
                            write.send(Message::Text(started.to_string().into())).await?;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Message::Ping(data)) => {
                write.send(Message::Pong(data)).await?;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    Ok(())
}
