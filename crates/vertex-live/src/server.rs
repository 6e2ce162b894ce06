//! Frames received from the Live endpoint.
//!
//! The endpoint multiplexes several unrelated payloads over one stream and
//! has been observed to use both camelCase and snake_case field names, so
//! frames are first parsed into a permissive raw shape and then classified
//! into exactly one [`ServerEvent`].

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed backend frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("backend frame is not valid UTF-8")]
    NotUtf8,
}

/// One function invocation requested by the model.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// A classified inbound frame.
///
/// Variants are tested in declaration order; the first one that matches wins.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The setup handshake was accepted.
    SetupComplete,
    /// The model wants one or more tools executed before it continues.
    ToolCall(Vec<FunctionCall>),
    /// The current turn is finished. Any text parts carried on the same
    /// frame are included so they are not lost.
    TurnComplete { trailing: Vec<String> },
    /// Incremental model output for the turn in progress.
    ContentParts(Vec<String>),
    /// The model has finished generating for this turn.
    GenerationComplete,
    /// Valid JSON that matches none of the above.
    Unrecognized,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    #[serde(default, alias = "setup_complete")]
    setup_complete: Option<Value>,
    #[serde(default, alias = "server_content")]
    server_content: Option<RawServerContent>,
    #[serde(default, alias = "tool_call")]
    tool_call: Option<RawToolCall>,
    #[serde(default, alias = "generation_complete")]
    generation_complete: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    #[serde(default, alias = "model_turn")]
    model_turn: Option<RawTurn>,
    #[serde(default, alias = "turn_complete")]
    turn_complete: Option<bool>,
    #[serde(default, alias = "generation_complete")]
    generation_complete: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
struct RawTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Deserialize, Debug, Default)]
struct RawPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default, alias = "function_calls")]
    function_calls: Vec<FunctionCall>,
}

impl ServerEvent {
    /// Decodes a text frame.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let msg: RawServerMessage = serde_json::from_str(raw)?;
        Ok(Self::classify(msg))
    }

    /// Decodes a binary frame, which the endpoint uses for JSON as well.
    pub fn decode_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
        Self::decode(text)
    }

    fn classify(msg: RawServerMessage) -> Self {
        if msg.setup_complete.is_some() {
            return ServerEvent::SetupComplete;
        }

        if let Some(call) = msg.tool_call {
            if !call.function_calls.is_empty() {
                return ServerEvent::ToolCall(call.function_calls);
            }
        }

        let content = msg.server_content.unwrap_or_default();
        let parts = content.model_turn.map(|turn| turn.parts);

        if content.turn_complete == Some(true) {
            return ServerEvent::TurnComplete {
                trailing: parts.map(texts).unwrap_or_default(),
            };
        }

        if let Some(parts) = parts.filter(|parts| !parts.is_empty()) {
            return ServerEvent::ContentParts(texts(parts));
        }

        if msg.generation_complete == Some(true) || content.generation_complete == Some(true) {
            return ServerEvent::GenerationComplete;
        }

        ServerEvent::Unrecognized
    }
}

fn texts(parts: Vec<RawPart>) -> Vec<String> {
    parts.into_iter().filter_map(|part| part.text).collect()
}
