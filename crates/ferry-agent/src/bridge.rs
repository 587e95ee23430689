use std::time::Duration;

use tracing::error;

use crate::error::AgentError;
use crate::session::SessionRegistry;
use crate::streaming::StreamingAgentClient;
use crate::sync_client::SyncAgentClient;

/// User-facing reply when any backend failure reaches the bridge.
pub const FALLBACK_REPLY: &str =
    "Sorry, I encountered an error processing your message. Please try again later.";
/// User-facing reply when the backend answered with no usable text.
pub const EMPTY_REPLY: &str = "I received your message but couldn't generate a response.";

/// Configured transport mode for a bridge.
pub enum Transport {
    Sync(SyncAgentClient),
    Streaming(StreamingAgentClient),
}

/// Orchestrates the session registry and the configured transport behind a
/// single deliver/reset contract. This is the only place internal failures
/// become a user-safe message.
pub struct AgentSessionBridge {
    registry: SessionRegistry,
    transport: Transport,
    request_timeout: Duration,
}

impl AgentSessionBridge {
    pub fn new(registry: SessionRegistry, transport: Transport, request_timeout: Duration) -> Self {
        Self {
            registry,
            transport,
            request_timeout,
        }
    }

    /// Resolve the session for `context_key`, deliver `text`, and return
    /// the agent's reply. Never fails: backend errors are logged and
    /// replaced with a fixed fallback string.
    pub async fn deliver(&self, context_key: &str, text: &str) -> String {
        let session_id = self.registry.resolve(context_key);
        match self.call_transport(&session_id, text).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => EMPTY_REPLY.to_string(),
            Err(cause) => {
                error!(context_key, %session_id, %cause, "message delivery failed");
                FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Discard the current session for `context_key` and return the fresh
    /// session identifier.
    pub fn reset(&self, context_key: &str) -> String {
        self.registry.reset(context_key)
    }

    async fn call_transport(&self, session_id: &str, text: &str) -> Result<String, AgentError> {
        match &self.transport {
            Transport::Sync(client) => client.send(session_id, text, self.request_timeout).await,
            Transport::Streaming(client) => {
                client
                    .stream(session_id, text, self.request_timeout, None)
                    .await
            }
        }
    }
}
