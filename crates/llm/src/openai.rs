//! OpenAI-compatible chat-completion transport.
//!
//! Sends one `POST {base}/chat/completions` per attempt and maps the outcome
//! onto [`dispatch::FailureKind`] using the HTTP status first and the error
//! text only when the status is not decisive.

use async_trait::async_trait;
use dispatch::{
    ChatCompletion, ChatRequest, ChatTransport, Credential, FailureKind, TransportError, Usage,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::LlmError;

const ERROR_BODY_PREVIEW_CHARS: usize = 500;

/// reqwest-backed [`ChatTransport`] for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiCompatTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenAiCompatTransport {
    /// Creates a transport for `base_url`.
    ///
    /// The HTTP client never routes through a proxy, whatever the environment
    /// says.
    pub fn new(base_url: &str) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            endpoint: chat_completions_url(base_url),
        })
    }
}

fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        return base.to_string();
    }
    format!("{base}/chat/completions")
}

/// Builds the JSON body: protocol fields first, then the extra body merged
/// over them.
fn wire_body(request: &ChatRequest) -> Value {
    let mut body = Map::new();
    body.insert(
        "model".to_string(),
        Value::String(request.protocol_model.clone()),
    );
    body.insert(
        "messages".to_string(),
        Value::Array(
            request
                .messages
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content }))
                .collect(),
        ),
    );
    body.insert("temperature".to_string(), json!(request.temperature));
    if let Some(format) = request.response_format {
        body.insert("response_format".to_string(), json!(format));
    }
    for (key, value) in &request.extra_body {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<Usage>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

fn preview(text: &str) -> String {
    text.chars().take(ERROR_BODY_PREVIEW_CHARS).collect()
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        return TransportError::new(FailureKind::Transient, error.to_string());
    }
    match error.status() {
        Some(status) => TransportError::from_status(status.as_u16(), error.to_string()),
        None => TransportError::from_message(error.to_string()),
    }
}

#[async_trait]
impl ChatTransport for OpenAiCompatTransport {
    async fn complete(
        &self,
        credential: &Credential,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential.expose())
            .timeout(request.timeout)
            .json(&wire_body(request))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status.as_u16(), preview(&body)));
        }

        let text = response.text().await.map_err(classify_reqwest_error)?;
        let wire: WireResponse = serde_json::from_str(&text).map_err(|e| {
            TransportError::new(
                FailureKind::Other,
                format!("invalid response body: {e}: {}", preview(&text)),
            )
        })?;

        // Some gateways report failures inside a 200 response.
        if let Some(error) = wire.error {
            let message = match error.code {
                Some(code) => format!("{code}: {}", error.message),
                None => error.message,
            };
            return Err(TransportError::from_message(message));
        }

        let choice = wire.choices.into_iter().next().ok_or_else(|| {
            TransportError::new(FailureKind::Other, "response contained no choices")
        })?;

        Ok(ChatCompletion {
            content: choice.message.content.unwrap_or_default(),
            usage: wire.usage,
        })
    }
}
