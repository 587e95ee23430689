use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AgentError;
use crate::http::shared_http_client;

pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String, AgentError>> + Send + 'a>>;

/// Source of bearer tokens for backend calls. Transport clients request a
/// fresh token before every call; providers cache and refresh internally.
pub trait TokenProvider: Send + Sync {
    fn get_token(&self) -> TokenFuture<'_>;
}

/// Pre-issued token, used for tests and environments where a token is
/// injected from outside.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn get_token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            if self.token.trim().is_empty() {
                return Err(AgentError::auth("configured access token is empty"));
            }
            Ok(self.token.clone())
        })
    }
}

pub const METADATA_TOKEN_ENDPOINT: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Hard bound on the metadata-server round trip, so a stalled endpoint
/// cannot hold up a delivery before the caller's own deadline starts.
const METADATA_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Fetches an access token from the ambient cloud metadata server.
#[derive(Debug, Clone)]
pub struct MetadataTokenProvider {
    endpoint: String,
    timeout: Duration,
}

impl MetadataTokenProvider {
    pub fn new() -> Self {
        Self {
            endpoint: METADATA_TOKEN_ENDPOINT.to_string(),
            timeout: METADATA_TOKEN_TIMEOUT,
        }
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: METADATA_TOKEN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for MetadataTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenProvider for MetadataTokenProvider {
    fn get_token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            let client = shared_http_client(&self.endpoint);
            let response = client
                .get(&self.endpoint)
                .header("Metadata-Flavor", "Google")
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|error| {
                    AgentError::auth(format!("metadata token request failed: {error}"))
                })?;
            if !response.status().is_success() {
                let status = response.status().as_u16();
                return Err(AgentError::auth(format!(
                    "metadata token request returned HTTP {status}"
                )));
            }
            let parsed = response
                .json::<MetadataTokenResponse>()
                .await
                .map_err(|error| {
                    AgentError::auth(format!("metadata token decode failed: {error}"))
                })?;
            parsed
                .access_token
                .filter(|token| !token.trim().is_empty())
                .ok_or_else(|| AgentError::auth("metadata token response had no access_token"))
        })
    }
}
