use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::json;

use ferry_agent::{
    AgentSessionBridge, BackendConfig, SessionRegistry, StaticTokenProvider, StreamingAgentClient,
    SyncAgentClient, Transport, EMPTY_REPLY, FALLBACK_REPLY,
};

async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("stub listener should bind");
    let addr = listener.local_addr().expect("stub addr should resolve");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

fn sync_bridge(base: &str) -> AgentSessionBridge {
    let backend =
        BackendConfig::new("my-project", "us", "support-app", None).with_rest_base(base);
    let client = SyncAgentClient::new(backend, Arc::new(StaticTokenProvider::new("test-token")));
    AgentSessionBridge::new(
        SessionRegistry::new(),
        Transport::Sync(client),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn deliver_returns_the_backend_reply_end_to_end() {
    let router = Router::new().route(
        "/{*rest}",
        post(|| async { Json(json!({"outputs": [{"text": "hi"}]})) }),
    );
    let base = spawn_stub(router).await;

    let bridge = sync_bridge(&base);
    assert_eq!(bridge.deliver("ctx-1", "hello").await, "hi");
}

#[tokio::test]
async fn deliver_converts_backend_failures_into_the_fallback_reply() {
    let router = Router::new().route(
        "/{*rest}",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
    );
    let base = spawn_stub(router).await;

    let bridge = sync_bridge(&base);
    assert_eq!(bridge.deliver("ctx-1", "hello").await, FALLBACK_REPLY);
}

#[tokio::test]
async fn deliver_substitutes_the_empty_reply_for_blank_results() {
    // A streaming backend that closes without ever emitting a fragment.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("stub listener should bind");
    let addr = listener.local_addr().expect("stub addr should resolve");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("stub accept");
        let mut socket = tokio_tungstenite::accept_async(stream)
            .await
            .expect("stub handshake");
        let _ = socket.next().await; // config
        let _ = socket.next().await; // input
        socket.close(None).await.expect("stub close");
    });

    let backend = BackendConfig::new("my-project", "us", "support-app", None)
        .with_stream_endpoint(format!("ws://{addr}"));
    let client =
        StreamingAgentClient::new(backend, Arc::new(StaticTokenProvider::new("test-token")));
    let bridge = AgentSessionBridge::new(
        SessionRegistry::new(),
        Transport::Streaming(client),
        Duration::from_secs(5),
    );
    assert_eq!(bridge.deliver("ctx-1", "hello").await, EMPTY_REPLY);
}

#[tokio::test]
async fn reset_hands_out_a_fresh_session_for_the_context() {
    let bridge = sync_bridge("http://127.0.0.1:9");
    let first = bridge.reset("ctx-1");
    let second = bridge.reset("ctx-1");
    assert_ne!(first, second);
}
