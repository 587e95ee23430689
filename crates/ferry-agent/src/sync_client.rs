use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::backend::BackendConfig;
use crate::credentials::TokenProvider;
use crate::error::AgentError;
use crate::frames::{RunSessionRequest, RunSessionResponse};
use crate::http::shared_http_client;

/// One-shot request/response transport for the backend's runSession call.
pub struct SyncAgentClient {
    backend: BackendConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl SyncAgentClient {
    pub fn new(backend: BackendConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { backend, tokens }
    }

    /// Deliver `message` to `session_id` and return the agent's reply.
    ///
    /// A fresh bearer token is obtained per call. Non-success statuses fail
    /// with a transport error carrying the status and body; a success
    /// response without any output text falls back to the raw JSON body so
    /// callers always get something to show.
    pub async fn send(
        &self,
        session_id: &str,
        message: &str,
        timeout: Duration,
    ) -> Result<String, AgentError> {
        let token = self.tokens.get_token().await?;
        let url = self.backend.run_session_url(session_id);
        let request = RunSessionRequest::new(
            self.backend.session_name(session_id),
            self.backend.deployment_resource_name(),
            message,
        );
        debug!(%url, session_id, "running session");

        let response = shared_http_client(&self.backend.rest_base)
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|error| {
                AgentError::transport(format!("runSession request failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_string());
            return Err(AgentError::transport(format!(
                "runSession returned HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let raw: Value = response.json().await.map_err(|error| {
            AgentError::transport(format!("runSession response decode failed: {error}"))
        })?;
        Ok(extract_response_text(&raw))
    }
}

/// Newline-join of every non-empty output text; falls back to the
/// pretty-printed raw response when no text is present.
fn extract_response_text(raw: &Value) -> String {
    let parsed: RunSessionResponse =
        serde_json::from_value(raw.clone()).unwrap_or(RunSessionResponse { outputs: Vec::new() });
    if let Some(text) = parsed.joined_text() {
        return text;
    }
    debug!("no output text in runSession response, returning raw body");
    serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_response_text_joins_outputs_in_order() {
        let raw = json!({"outputs": [{"text": "hi"}, {"text": "there"}]});
        assert_eq!(extract_response_text(&raw), "hi\nthere");
    }

    #[test]
    fn extract_response_text_falls_back_to_raw_json() {
        let raw = json!({"outputs": [], "diagnostics": {"note": "empty"}});
        let fallback = extract_response_text(&raw);
        assert!(
            fallback.contains("diagnostics"),
            "fallback should render the raw response body"
        );
    }
}
