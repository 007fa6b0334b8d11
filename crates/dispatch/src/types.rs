//! Value types for the dispatch domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! values with invariants (retry counts are at least one, payloads are JSON
//! objects) and flow through every attempt of a call.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CallId, ModelId};

/// Key under which token usage is attached to a successful payload.
pub const USAGE_FIELD: &str = "_usage";

/// Model name sent in the protocol-level `model` slot.
///
/// The real candidate travels in [`ChatRequest::extra_body`], which the
/// transport merges over the top-level body.
pub const PROTOCOL_PLACEHOLDER_MODEL: &str = "gpt-3.5-turbo";

// ---------------------------------------------------------------------------
// Token usage
// ---------------------------------------------------------------------------

/// Number of tokens consumed by an LLM API call.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TokenCount(u64);

impl TokenCount {
    /// Creates a [`TokenCount`] from a raw integer.
    pub fn new(count: u64) -> Self {
        Self(count)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TokenCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token usage reported by the provider for one successful attempt.
///
/// Provider-specific extras (e.g. `prompt_tokens_details`) are preserved in
/// [`Usage::extra`] so the `_usage` field round-trips what the provider sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: TokenCount,
    #[serde(default)]
    pub completion_tokens: TokenCount,
    #[serde(default)]
    pub total_tokens: TokenCount,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Usage {
    /// Creates usage from the three standard counters.
    pub fn new(prompt: u64, completion: u64, total: u64) -> Self {
        Self {
            prompt_tokens: TokenCount::new(prompt),
            completion_tokens: TokenCount::new(completion),
            total_tokens: TokenCount::new(total),
            extra: Map::new(),
        }
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            Value::Object(Map::from_iter([("raw".to_string(), e.to_string().into())]))
        })
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One `{role, content}` pair of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ---------------------------------------------------------------------------
// Call options
// ---------------------------------------------------------------------------

/// Response-format hint forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// The provider should emit a single JSON object.
    JsonObject,
}

/// Per-call knobs for a dispatch call.
///
/// Defaults: temperature `0.1`, timeout 120 s, 3 attempts per
/// (credential, model) pair, 2 s base retry delay, text mode, no extra
/// parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    /// Sampling temperature.
    pub temperature: f64,

    /// Upper bound on a single network attempt (not on the whole search).
    pub timeout: Duration,

    /// Attempts per (credential, model) pair. Values below 1 behave as 1.
    pub max_retries: u32,

    /// Delay before the first in-place retry; doubled after every retry.
    pub retry_delay: Duration,

    /// When `true`, the content must parse as a JSON object.
    pub json_mode: bool,

    /// Provider-specific parameters merged into the extra body.
    pub extra_params: Map<String, Value>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            json_mode: false,
            extra_params: Map::new(),
        }
    }
}

impl CallOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    /// Adds one provider-specific parameter to the extra body.
    pub fn with_extra_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_params.insert(key.into(), value.into());
        self
    }

    /// Number of attempts made against one (credential, model) pair.
    pub fn attempts_per_model(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// The response-format hint implied by [`CallOptions::json_mode`].
    pub fn response_format(&self) -> Option<ResponseFormat> {
        self.json_mode.then_some(ResponseFormat::JsonObject)
    }
}

// ---------------------------------------------------------------------------
// Wire-neutral request / completion
// ---------------------------------------------------------------------------

/// Everything a transport needs for one attempt against one candidate model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Candidate this attempt targets. Informational; the transport reads the
    /// effective model from [`ChatRequest::extra_body`].
    pub model: ModelId,

    /// Value of the protocol-level `model` field.
    pub protocol_model: String,

    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub timeout: Duration,
    pub response_format: Option<ResponseFormat>,

    /// Out-of-band body fields merged over the top-level request body.
    /// Always starts with `{"model": <candidate>}`, followed by the caller's
    /// extra parameters (which may override it).
    pub extra_body: Map<String, Value>,
}

impl ChatRequest {
    /// Builds the request for `model` from the caller's messages and options.
    pub fn for_candidate(model: &ModelId, messages: &[ChatMessage], options: &CallOptions) -> Self {
        let mut extra_body = Map::new();
        extra_body.insert("model".to_string(), Value::String(model.to_string()));
        for (key, value) in &options.extra_params {
            extra_body.insert(key.clone(), value.clone());
        }

        Self {
            model: model.clone(),
            protocol_model: PROTOCOL_PLACEHOLDER_MODEL.to_string(),
            messages: messages.to_vec(),
            temperature: options.temperature,
            timeout: options.timeout,
            response_format: options.response_format(),
            extra_body,
        }
    }
}

/// A non-erroring response from the provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
    /// Message content of the first choice. A null content is empty.
    pub content: String,
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

// ---------------------------------------------------------------------------
// Call output
// ---------------------------------------------------------------------------

/// The uniform success shape returned by a dispatch call.
///
/// `payload` is always a JSON object. In JSON mode it is the parsed content;
/// in text mode it is `{"content": <text>}`. Either way usage, when reported,
/// is attached under [`USAGE_FIELD`].
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutput {
    pub call_id: CallId,
    /// Candidate that produced the response.
    pub model: ModelId,
    /// Position of the credential that succeeded in the credential set.
    pub credential_index: usize,
    /// Total attempts made by the search, including the successful one.
    pub attempts: u32,
    pub payload: Map<String, Value>,
    pub usage: Option<Usage>,
}

impl CallOutput {
    /// Text content for text-mode calls.
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(Value::as_str)
    }

    /// Looks up a top-level payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Consumes the output, returning the payload as a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }
}

/// Normalises a text-mode completion into `{"content": ..., "_usage": ...}`.
pub fn text_payload(content: String, usage: Option<&Usage>) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("content".to_string(), Value::String(content));
    attach_usage(&mut payload, usage);
    payload
}

/// Parses a strict-JSON completion and attaches usage to the object.
///
/// Returns the parser's message when the content is not a JSON object.
pub fn json_payload(content: &str, usage: Option<&Usage>) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(mut payload)) => {
            attach_usage(&mut payload, usage);
            Ok(payload)
        }
        Ok(other) => Err(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        )),
        Err(e) => Err(e.to_string()),
    }
}

fn attach_usage(payload: &mut Map<String, Value>, usage: Option<&Usage>) {
    if let Some(usage) = usage {
        payload.insert(USAGE_FIELD.to_string(), usage.to_value());
    }
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
