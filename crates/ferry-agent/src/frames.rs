//! Wire shapes for the backend's run-session and bidi-stream protocols,
//! plus the ordered text-extraction rules shared by both transports.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

/// Body of the synchronous runSession call.
#[derive(Debug, Clone, Serialize)]
pub struct RunSessionRequest {
    pub config: SessionConfig,
    pub inputs: Vec<TextInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextInput {
    pub text: String,
}

impl RunSessionRequest {
    pub fn new(session: String, deployment: Option<String>, text: impl Into<String>) -> Self {
        Self {
            config: SessionConfig {
                session,
                deployment,
            },
            inputs: vec![TextInput { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSessionResponse {
    #[serde(default)]
    pub outputs: Vec<OutputChunk>,
}

impl RunSessionResponse {
    /// Newline-join of every non-empty output text, in list order.
    pub fn joined_text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .outputs
            .iter()
            .filter_map(|output| output.text.as_deref())
            .filter(|text| !text.is_empty())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }
}

/// First frame of a streaming exchange, naming the session (and deployment).
#[derive(Debug, Clone, Serialize)]
pub struct ConfigFrame {
    pub config: SessionConfig,
}

/// Second frame of a streaming exchange, carrying the user message.
#[derive(Debug, Clone, Serialize)]
pub struct InputFrame {
    pub realtime_input: TextInput,
}

impl InputFrame {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            realtime_input: TextInput { text: text.into() },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputChunk {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "turnComplete")]
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameResponse {
    #[serde(default)]
    pub content: Vec<ContentEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentEntry {
    #[serde(default)]
    pub text: Option<String>,
}

/// One inbound frame of a streaming exchange. A frame carries a primary
/// output, a nested response/content structure, a top-level completion
/// flag, or some combination of the three.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerFrame {
    #[serde(default)]
    pub output: Option<OutputChunk>,
    #[serde(default)]
    pub response: Option<FrameResponse>,
    #[serde(default, alias = "turnComplete")]
    pub turn_complete: Option<bool>,
}

impl ServerFrame {
    /// Non-empty text fragments in fixed rule order: the primary output
    /// field first, then nested response/content entries.
    pub fn text_fragments(&self) -> Vec<String> {
        let mut fragments = Vec::new();
        if let Some(text) = self
            .output
            .as_ref()
            .and_then(|output| output.text.as_deref())
            .filter(|text| !text.is_empty())
        {
            fragments.push(text.to_string());
        }
        if let Some(response) = self.response.as_ref() {
            for entry in &response.content {
                if let Some(text) = entry.text.as_deref().filter(|text| !text.is_empty()) {
                    fragments.push(text.to_string());
                }
            }
        }
        fragments
    }

    /// End-of-turn predicate: a top-level flag or one nested in the primary
    /// output both count; whichever frame carries either first wins.
    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete == Some(true)
            || self
                .output
                .as_ref()
                .and_then(|output| output.turn_complete)
                == Some(true)
    }
}
