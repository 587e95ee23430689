use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

use ferry_agent::{AgentErrorCode, BackendConfig, StaticTokenProvider, StreamingAgentClient};

fn client_for(stream_endpoint: &str) -> StreamingAgentClient {
    let backend = BackendConfig::new("my-project", "us", "support-app", None)
        .with_stream_endpoint(stream_endpoint);
    StreamingAgentClient::new(backend, Arc::new(StaticTokenProvider::new("test-token")))
}

async fn bind_stub() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("stub listener should bind");
    let addr = listener.local_addr().expect("stub addr should resolve");
    (listener, format!("ws://{addr}"))
}

fn text_frame(value: Value) -> Message {
    Message::Text(value.to_string())
}

#[tokio::test]
async fn stream_returns_fragments_up_to_the_completion_frame() {
    let (listener, endpoint) = bind_stub().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("stub accept");
        let mut socket = tokio_tungstenite::accept_async(stream)
            .await
            .expect("stub handshake");

        // Setup frames arrive in order: config first, then the input.
        let config = socket.next().await.expect("config frame").expect("config frame ok");
        let parsed: Value =
            serde_json::from_str(config.to_text().expect("config text")).expect("config json");
        assert_eq!(
            parsed["config"]["session"],
            "projects/my-project/locations/us/apps/support-app/sessions/tg-10001"
        );
        let input = socket.next().await.expect("input frame").expect("input frame ok");
        let parsed: Value =
            serde_json::from_str(input.to_text().expect("input text")).expect("input json");
        assert_eq!(parsed["realtime_input"]["text"], "hello");

        for frame in [
            json!({"output": {"text": "alpha"}}),
            json!({"output": {"text": "beta"}}),
            json!({"output": {"text": "gamma"}, "turn_complete": true}),
        ] {
            socket.send(text_frame(frame)).await.expect("stub send");
        }
        // Keep the connection open: the client must be released by the
        // completion flag, not by a server close.
        let _ = socket.next().await;
    });

    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let started = Instant::now();
    let reply = client_for(&endpoint)
        .stream(
            "tg-10001",
            "hello",
            Duration::from_secs(10),
            Some(Box::new(move |fragment| {
                sink.lock().expect("sink lock").push(fragment.to_string());
            })),
        )
        .await
        .expect("stream should complete");

    assert_eq!(reply, "alpha\nbeta\ngamma");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "completion frame should release the caller before the timeout"
    );
    assert_eq!(
        *collected.lock().expect("sink lock"),
        vec!["alpha", "beta", "gamma"],
        "fragment callback should observe fragments in arrival order"
    );
}

#[tokio::test]
async fn stream_times_out_and_reports_the_partial_reply() {
    let (listener, endpoint) = bind_stub().await;
    let (teardown_tx, teardown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("stub accept");
        let mut socket = tokio_tungstenite::accept_async(stream)
            .await
            .expect("stub handshake");
        let _ = socket.next().await; // config
        let _ = socket.next().await; // input
        socket
            .send(text_frame(json!({"output": {"text": "partial answer"}})))
            .await
            .expect("stub send");
        // Never send a completion; wait for the client to force-close.
        while let Some(message) = socket.next().await {
            if matches!(message, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
        let _ = teardown_tx.send(());
    });

    let started = Instant::now();
    let error = client_for(&endpoint)
        .stream("tg-10001", "hello", Duration::from_millis(300), None)
        .await
        .expect_err("missing completion should time out");

    assert_eq!(error.code, AgentErrorCode::Timeout);
    assert_eq!(error.partial_reply(), Some("partial answer"));
    assert!(
        started.elapsed() >= Duration::from_millis(300),
        "call must block for the full timeout before degrading"
    );
    assert!(
        started.elapsed() < Duration::from_secs(6),
        "teardown must finish within the worker join grace"
    );
    tokio::time::timeout(Duration::from_secs(1), teardown_rx)
        .await
        .expect("server should observe the connection closing")
        .expect("teardown signal should arrive");
}

#[tokio::test]
async fn server_close_releases_the_caller_with_collected_fragments() {
    let (listener, endpoint) = bind_stub().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("stub accept");
        let mut socket = tokio_tungstenite::accept_async(stream)
            .await
            .expect("stub handshake");
        let _ = socket.next().await; // config
        let _ = socket.next().await; // input
        socket
            .send(text_frame(json!({"output": {"text": "alpha"}})))
            .await
            .expect("stub send");
        socket
            .send(text_frame(json!({"response": {"content": [{"text": "beta"}]}})))
            .await
            .expect("stub send");
        socket.close(None).await.expect("stub close");
    });

    let started = Instant::now();
    let reply = client_for(&endpoint)
        .stream("tg-10001", "hello", Duration::from_secs(10), None)
        .await
        .expect("server close is not an error");
    assert_eq!(reply, "alpha\nbeta");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "close should release the caller without waiting for the timeout"
    );
}

#[tokio::test]
async fn unparseable_frames_are_skipped_without_ending_the_exchange() {
    let (listener, endpoint) = bind_stub().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("stub accept");
        let mut socket = tokio_tungstenite::accept_async(stream)
            .await
            .expect("stub handshake");
        let _ = socket.next().await; // config
        let _ = socket.next().await; // input
        socket
            .send(Message::Text("this is not json".to_string()))
            .await
            .expect("stub send");
        socket
            .send(text_frame(json!({"output": {"text": "still here"}, "turn_complete": true})))
            .await
            .expect("stub send");
        let _ = socket.next().await;
    });

    let reply = client_for(&endpoint)
        .stream("tg-10001", "hello", Duration::from_secs(10), None)
        .await
        .expect("protocol errors are non-fatal");
    assert_eq!(reply, "still here");
}

#[tokio::test]
async fn connect_failure_surfaces_as_a_transport_error() {
    // Bind and immediately drop to get a port nobody is listening on.
    let (listener, endpoint) = bind_stub().await;
    drop(listener);

    let error = client_for(&endpoint)
        .stream("tg-10001", "hello", Duration::from_secs(5), None)
        .await
        .expect_err("connecting to a dead port should fail");
    assert_eq!(error.code, AgentErrorCode::Transport);
}
