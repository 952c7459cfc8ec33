//! Response Protocol
//!
//! The model is instructed to reply with a JSON envelope carrying a
//! thought/action/answer triplet. This module decodes that envelope out of
//! free-form model output and validates its shape. Parsing is a pure
//! function returning `Result`; callers pattern-match instead of catching.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Classification of one loop iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// A tool ran and its result was fed back into the conversation
    Observation,
    /// The model produced a final answer
    Answer,
    /// The model only thought out loud; re-prompt without a new turn
    Thought,
    /// Unrecoverable failure for this run
    Error,
    /// The permission hook denied the requested action
    ActionForbidden,
    /// Valid JSON, but no thought, action, or answer present
    None,
}

/// A structured request from the model to invoke a named tool
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Registered tool name
    pub name: String,

    /// Keyword-style arguments
    #[serde(default)]
    pub args: Map<String, Value>,

    /// Whether the action edits state (consulted by the permission hook)
    #[serde(default)]
    pub edit: bool,
}

/// The decoded thought/action/answer envelope
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Ordered reasoning lines
    #[serde(default)]
    pub thought: Vec<String>,

    /// Requested tool invocation
    #[serde(default)]
    pub action: Option<ActionRequest>,

    /// Final answer text
    #[serde(default)]
    pub answer: Option<String>,
}

impl AgentResponse {
    /// True when the envelope requests a tool invocation
    pub fn has_action(&self) -> bool {
        self.action.as_ref().is_some_and(|a| !a.name.is_empty())
    }

    /// True when the envelope carries a final answer
    pub fn has_answer(&self) -> bool {
        self.answer.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Reasoning lines joined for display
    pub fn joined_thought(&self) -> String {
        self.thought.join("\n")
    }
}

/// Why a model response could not be decoded
#[derive(Error, Debug)]
pub enum ParseError {
    /// Not valid JSON at the start of the response
    #[error("JSONDecodeError: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON with the wrong shape
    #[error("ValidationError: {0}")]
    Schema(String),

    /// Blank response
    #[error("empty response")]
    Empty,
}

/// Decode the leading JSON envelope from raw model output.
///
/// The text may contain trailing non-JSON commentary after the object;
/// decoding stops at the first complete JSON value rather than requiring
/// the entire string to be valid JSON. Chatty models append prose.
pub fn parse_response(raw: &str) -> Result<AgentResponse, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut values = serde_json::Deserializer::from_str(trimmed).into_iter::<Value>();
    let value = match values.next() {
        Some(Ok(value)) => value,
        Some(Err(err)) => return Err(ParseError::Json(err)),
        None => return Err(ParseError::Empty),
    };

    if !value.is_object() {
        return Err(ParseError::Schema(format!(
            "expected a JSON object, got {}",
            json_type_name(&value)
        )));
    }

    serde_json::from_value(value).map_err(|err| ParseError::Schema(err.to_string()))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
