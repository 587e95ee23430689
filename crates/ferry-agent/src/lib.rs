//! Session bridge between chat front ends and a remote conversational-agent backend.

mod backend;
mod bridge;
mod credentials;
mod error;
mod frames;
mod http;
mod session;
mod streaming;
mod sync_client;

pub use backend::BackendConfig;
pub use bridge::{AgentSessionBridge, Transport, EMPTY_REPLY, FALLBACK_REPLY};
pub use credentials::{
    MetadataTokenProvider, StaticTokenProvider, TokenFuture, TokenProvider,
    METADATA_TOKEN_ENDPOINT,
};
pub use error::{AgentError, AgentErrorCode};
pub use frames::{
    ConfigFrame, InputFrame, OutputChunk, RunSessionRequest, RunSessionResponse, ServerFrame,
    SessionConfig,
};
pub use session::{sanitize_session_id, SessionRegistry};
pub use streaming::{FragmentCallback, StreamingAgentClient};
pub use sync_client::SyncAgentClient;
