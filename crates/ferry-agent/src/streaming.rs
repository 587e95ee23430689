use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};

use crate::backend::BackendConfig;
use crate::credentials::TokenProvider;
use crate::error::AgentError;
use crate::frames::{ConfigFrame, InputFrame, ServerFrame, SessionConfig};

/// Invoked on the worker task, in frame-arrival order, once per fragment.
pub type FragmentCallback = Box<dyn Fn(&str) + Send + 'static>;

/// Bounded wait for the worker after the caller decides the call is over.
const WORKER_JOIN_GRACE: Duration = Duration::from_secs(5);

/// Duplex streaming transport for the backend's bidiRunSession exchange.
///
/// Each `stream` call runs its own worker task that owns the connection;
/// the calling task blocks on a single-fire release signal. On every exit
/// path (completion, error, or timeout) the connection is closed and the
/// worker joined before the call returns.
pub struct StreamingAgentClient {
    backend: BackendConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl StreamingAgentClient {
    pub fn new(backend: BackendConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { backend, tokens }
    }

    /// Deliver `message` to `session_id` over a fresh duplex exchange and
    /// return the newline-joined fragments collected before end-of-turn.
    ///
    /// If no completion arrives within `timeout` the connection is torn
    /// down and a timeout error is returned with the partial reply in its
    /// details. Worker-side failures surface as transport errors.
    pub async fn stream(
        &self,
        session_id: &str,
        message: &str,
        timeout: Duration,
        on_fragment: Option<FragmentCallback>,
    ) -> Result<String, AgentError> {
        let token = self.tokens.get_token().await?;
        let request = self.build_handshake_request(&token)?;
        let config_frame = serde_json::to_string(&ConfigFrame {
            config: SessionConfig {
                session: self.backend.session_name(session_id),
                deployment: self.backend.deployment_resource_name(),
            },
        })
        .map_err(|error| AgentError::transport(format!("config frame encode failed: {error}")))?;
        let input_frame = serde_json::to_string(&InputFrame::new(message))
            .map_err(|error| AgentError::transport(format!("input frame encode failed: {error}")))?;

        let exchange = Arc::new(StreamingExchange::new());
        let close = Arc::new(Notify::new());
        let mut worker = tokio::spawn(run_exchange(
            request,
            config_frame,
            input_frame,
            Arc::clone(&exchange),
            Arc::clone(&close),
            on_fragment,
        ));

        let released = exchange.wait_released(timeout).await;
        if !released {
            debug!(session_id, "stream deadline elapsed, forcing close");
            close.notify_one();
        }
        if tokio::time::timeout(WORKER_JOIN_GRACE, &mut worker)
            .await
            .is_err()
        {
            warn!(session_id, "stream worker outlived its grace period, aborting");
            worker.abort();
            let _ = worker.await;
        }

        let reply = exchange.joined_fragments();
        if let Some(error) = exchange.take_error() {
            return Err(error);
        }
        if !released {
            return Err(AgentError::timeout(format!(
                "no turn completion within {}ms",
                timeout.as_millis()
            ))
            .with_details(json!({ "partial_reply": reply })));
        }
        Ok(reply)
    }

    fn build_handshake_request(&self, token: &str) -> Result<Request, AgentError> {
        let mut request = self
            .backend
            .stream_endpoint
            .as_str()
            .into_client_request()
            .map_err(|error| {
                AgentError::transport(format!("stream endpoint is not a valid URL: {error}"))
            })?;
        let header = format!("Bearer {token}")
            .parse::<HeaderValue>()
            .map_err(|error| AgentError::auth(format!("bearer token is not a valid header: {error}")))?;
        request.headers_mut().insert("Authorization", header);
        Ok(request)
    }
}

/// Per-call exchange state: collected fragments, an error slot, and a
/// single-fire release signal shared between worker and caller.
struct StreamingExchange {
    fragments: Mutex<Vec<String>>,
    error: Mutex<Option<AgentError>>,
    released: AtomicBool,
    release_notify: Notify,
}

impl StreamingExchange {
    fn new() -> Self {
        Self {
            fragments: Mutex::new(Vec::new()),
            error: Mutex::new(None),
            released: AtomicBool::new(false),
            release_notify: Notify::new(),
        }
    }

    fn push_fragment(&self, fragment: String) {
        self.fragments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(fragment);
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.release_notify.notify_waiters();
    }

    fn fail(&self, error: AgentError) {
        let mut slot = self
            .error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.release();
    }

    /// Block until the worker releases the call or `timeout` elapses.
    /// Returns whether the release signal fired in time.
    async fn wait_released(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.released.load(Ordering::SeqCst) {
                return true;
            }
            let notified = self.release_notify.notified();
            if self.released.load(Ordering::SeqCst) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.released.load(Ordering::SeqCst);
            }
        }
    }

    fn joined_fragments(&self) -> String {
        self.fragments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .join("\n")
    }

    fn take_error(&self) -> Option<AgentError> {
        self.error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Worker task owning the duplex connection for one exchange: connect,
/// send the config and input frames, then pump inbound frames until
/// end-of-turn, a close, an error, or the caller's force-close signal.
async fn run_exchange(
    request: Request,
    config_frame: String,
    input_frame: String,
    exchange: Arc<StreamingExchange>,
    close: Arc<Notify>,
    on_fragment: Option<FragmentCallback>,
) {
    let (socket, _response) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(error) => {
            exchange.fail(AgentError::transport(format!(
                "stream connect failed: {error}"
            )));
            return;
        }
    };
    let (mut write, mut read) = socket.split();

    for frame in [config_frame, input_frame] {
        if let Err(error) = write.send(Message::Text(frame)).await {
            exchange.fail(AgentError::transport(format!(
                "stream setup send failed: {error}"
            )));
            let _ = write.close().await;
            return;
        }
    }

    loop {
        tokio::select! {
            _ = close.notified() => {
                let _ = write.close().await;
                break;
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let frame: ServerFrame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(error) => {
                            // Unparseable frames are dropped; the exchange continues.
                            warn!("discarding unparseable stream frame: {error}");
                            continue;
                        }
                    };
                    for fragment in frame.text_fragments() {
                        if let Some(callback) = on_fragment.as_ref() {
                            callback(&fragment);
                        }
                        exchange.push_fragment(fragment);
                    }
                    if frame.is_turn_complete() {
                        exchange.release();
                        let _ = write.close().await;
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    exchange.release();
                    break;
                }
                // Ping/pong frames are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    exchange.fail(AgentError::transport(format!(
                        "stream receive failed: {error}"
                    )));
                    break;
                }
            }
        }
    }
}
