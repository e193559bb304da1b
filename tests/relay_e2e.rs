//! End-to-end relay tests
//!
//! These tests run the real gateway server on an ephemeral port with the
//! production backend connector pointed at a mock backend WebSocket server,
//! then drive the full flow from a telephony client: stream start, caller
//! audio, assistant audio relay with marks, and barge-in truncation.

mod mock_backend;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use callbridge_gateway::config::ServerConfig;
use callbridge_gateway::core::relay::{AudioFormat, StreamRestartPolicy};
use callbridge_gateway::routes;
use callbridge_gateway::state::AppState;

use mock_backend::{MockBackend, MockScript};

fn test_config(backend_url: String, greeting: Option<String>) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        backend_url,
        backend_api_key: Some("test-key".to_string()),
        backend_model: "mock-model".to_string(),
        backend_voice: Some("sage".to_string()),
        backend_instructions: Some("You are a phone agent.".to_string()),
        backend_modalities: None,
        backend_temperature: None,
        audio_format: AudioFormat::G711Ulaw,
        greeting,
        stream_restart_policy: StreamRestartPolicy::PreservePlayback,
        auth_required: false,
        auth_api_secrets: Vec::new(),
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 60,
        rate_limit_burst_size: 10,
        max_websocket_connections: None,
        max_connections_per_ip: 10,
    }
}

/// Start the gateway on an ephemeral port; returns its address.
async fn spawn_gateway(config: ServerConfig) -> (SocketAddr, JoinHandle<()>) {
    let state = AppState::new(config).expect("state should build");
    let app = Router::new()
        .merge(routes::api::create_api_router())
        .merge(routes::relay::create_relay_router())
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("gateway serve");
    });
    (addr, server)
}

/// Receive the next JSON text frame, with a timeout.
async fn next_json<S>(ws: &mut S) -> Option<Value>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")?;
        match msg.expect("socket error") {
            Message::Text(text) => {
                return Some(serde_json::from_str(&text).expect("frame should be JSON"));
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

fn media_frame(timestamp: u64) -> Message {
    Message::Text(
        json!({
            "event": "media",
            "media": {"payload": "QUJD", "timestamp": timestamp},
        })
        .to_string()
        .into(),
    )
}

#[tokio::test]
async fn full_relay_flow_with_barge_in() {
    let backend = MockBackend::spawn(MockScript::default()).await;
    let (addr, _server) = spawn_gateway(test_config(backend.url(), None)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/media-stream"))
        .await
        .expect("telephony connect");

    // The gateway configures the backend session on connect
    let session_update = backend.wait_for_command("session.update").await;
    assert_eq!(session_update["session"]["voice"], "sage");
    assert_eq!(session_update["session"]["input_audio_format"], "g711_ulaw");

    // Stream start, then caller audio at t=0
    ws.send(Message::Text(
        json!({"event": "start", "start": {"streamSid": "SD1"}})
            .to_string()
            .into(),
    ))
    .await
    .expect("send start");
    ws.send(media_frame(0)).await.expect("send media");

    // Caller audio reaches the backend unmodified
    let append = backend.wait_for_command("input_audio_buffer.append").await;
    assert_eq!(append["audio"], "QUJD");

    // The scripted delta comes back as a media frame plus a mark
    let media = next_json(&mut ws).await.expect("media frame");
    assert_eq!(media["event"], "media");
    assert_eq!(media["streamSid"], "SD1");
    assert_eq!(media["media"]["payload"], "QUJD");

    let mark = next_json(&mut ws).await.expect("mark frame");
    assert_eq!(mark["event"], "mark");
    assert_eq!(mark["streamSid"], "SD1");
    assert!(mark["mark"]["name"].is_string());

    // Caller speaks again at t=300; the mock reports speech-started,
    // which must truncate the in-flight item and clear the stream
    ws.send(media_frame(300)).await.expect("send media");

    let clear = next_json(&mut ws).await.expect("clear frame");
    assert_eq!(clear["event"], "clear");
    assert_eq!(clear["streamSid"], "SD1");

    let truncate = backend.wait_for_command("conversation.item.truncate").await;
    assert_eq!(truncate["item_id"], "item-1");
    assert_eq!(truncate["content_index"], 0);
    assert_eq!(truncate["audio_end_ms"], 300);

    // Exactly one truncate for the whole interruption
    let truncates = backend
        .received()
        .await
        .iter()
        .filter(|v| v["type"] == "conversation.item.truncate")
        .count();
    assert_eq!(truncates, 1);

    ws.close(None).await.expect("close telephony");
}

#[tokio::test]
async fn greeting_fires_once_backend_is_ready() {
    let backend = MockBackend::spawn(MockScript {
        delta_on_append: usize::MAX,
        speech_started_on_append: usize::MAX,
    })
    .await;
    let greeting = Some("Greet the caller.".to_string());
    let (addr, _server) = spawn_gateway(test_config(backend.url(), greeting)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/media-stream"))
        .await
        .expect("telephony connect");

    // session.update -> session.created -> greeting item + response.create
    let item = backend.wait_for_command("conversation.item.create").await;
    assert_eq!(item["item"]["type"], "message");
    assert_eq!(item["item"]["role"], "user");
    assert_eq!(item["item"]["content"][0]["text"], "Greet the caller.");
    backend.wait_for_command("response.create").await;

    ws.close(None).await.expect("close telephony");
}

#[tokio::test]
async fn no_greeting_means_no_conversation_start() {
    let backend = MockBackend::spawn(MockScript::default()).await;
    let (addr, _server) = spawn_gateway(test_config(backend.url(), None)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/media-stream"))
        .await
        .expect("telephony connect");

    backend.wait_for_command("session.update").await;
    // Give the relay a moment to misbehave if it were going to
    tokio::time::sleep(Duration::from_millis(200)).await;
    backend.assert_not_received("conversation.item.create").await;
    backend.assert_not_received("response.create").await;

    ws.close(None).await.expect("close telephony");
}

#[tokio::test]
async fn unreachable_backend_closes_the_telephony_socket() {
    // Point the gateway at a port nothing listens on
    let (addr, _server) =
        spawn_gateway(test_config("ws://127.0.0.1:1".to_string(), None)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/media-stream"))
        .await
        .expect("telephony connect");

    // The gateway cannot reach its backend, so the session ends promptly
    let frame = next_json(&mut ws).await;
    assert!(frame.is_none(), "expected close, got {frame:?}");
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    use tower::ServiceExt;

    let config = test_config("ws://127.0.0.1:1".to_string(), None);
    let state = AppState::new(config).expect("state should build");
    let app: Router = Router::new()
        .merge(routes::api::create_api_router())
        .with_state(state);

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "callbridge-gateway");
}
