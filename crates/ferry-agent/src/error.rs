use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorCode {
    /// Missing or invalid setup; aborts startup, never reaches the bridge.
    Config,
    /// Token acquisition or refresh failure.
    Auth,
    /// Non-success status, connection failure, or serialization failure on the wire.
    Transport,
    /// Unparseable inbound frame; absorbed inside the streaming client.
    Protocol,
    /// No turn completion within the deadline; may still carry a partial result.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
    pub code: AgentErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AgentError {
    pub fn new(code: AgentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(AgentErrorCode::Config, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(AgentErrorCode::Auth, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(AgentErrorCode::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(AgentErrorCode::Protocol, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AgentErrorCode::Timeout, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.code == AgentErrorCode::Timeout
    }

    /// Partial reply collected before a streaming timeout fired, if any.
    pub fn partial_reply(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|details| details.get("partial_reply"))
            .and_then(Value::as_str)
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"code\":\"transport\",\"message\":\"{}\"}}",
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

impl Display for AgentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for AgentError {}
