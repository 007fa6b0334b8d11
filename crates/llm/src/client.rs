//! The multi-credential, multi-model dispatch client.
//!
//! [`DispatchClient::call`] runs a strictly sequential three-level search:
//!
//! ```text
//! for credential in credentials
//!   for model in model candidates        (NextModel on authentication / rate limit / other)
//!     for attempt in 1..=max_retries     (RetrySameTarget on transient / parse failure)
//! ```
//!
//! The first successful attempt ends the search. Backoff sleeps and network
//! I/O are the only suspension points; the per-attempt timeout bounds a single
//! network call, not the whole search.

use std::sync::Arc;
use std::time::Duration;

use dispatch::{
    json_payload, text_payload, CallId, CallOptions, CallOutput, ChatCompletion, ChatMessage,
    ChatRequest, ChatTransport, Credential, DispatchError, ModelCandidates, RetryPolicy,
    TransportError, Usage,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{ClientConfig, ClientSettings};
use crate::openai::OpenAiCompatTransport;
use crate::proxy::ProxyEnvGuard;
use crate::LlmError;

const CONTENT_PREVIEW_CHARS: usize = 500;

/// Dispatches chat calls across credentials and model candidates.
///
/// Holds only read-only configuration, so one instance can serve concurrent
/// calls.
#[derive(Clone)]
pub struct DispatchClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn ChatTransport>,
}

impl std::fmt::Debug for DispatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DispatchClient {
    /// Creates a client over an arbitrary transport.
    ///
    /// Never fails: a configuration without credentials yields an
    /// unconfigured client whose calls fail immediately.
    pub fn new(config: ClientConfig, transport: Arc<dyn ChatTransport>) -> Self {
        if config.is_configured() {
            info!(
                credentials = config.credentials.len(),
                models = config.models.len(),
                base_url = %config.base_url,
                "dispatch client configured"
            );
        } else {
            warn!("no API credential configured; dispatch calls will fail");
        }
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    /// Creates a client that talks to `config.base_url` over HTTP.
    pub fn from_config(config: ClientConfig) -> Result<Self, LlmError> {
        let transport = OpenAiCompatTransport::new(&config.base_url)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Resolves `settings` against the process environment and creates an
    /// HTTP-backed client.
    pub fn from_settings(settings: ClientSettings) -> Result<Self, LlmError> {
        Self::from_config(ClientConfig::from_process_env(settings))
    }

    /// Creates an HTTP-backed client configured purely from the environment.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_settings(ClientSettings::default())
    }

    /// `true` when at least one credential is available. Callers should check
    /// this before relying on [`DispatchClient::call`].
    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Effective model order tried under every credential.
    pub fn model_candidates(&self) -> &ModelCandidates {
        &self.config.models
    }

    /// Sends `messages`, falling back across credentials and models until one
    /// attempt succeeds or every combination has failed.
    ///
    /// Proxy environment variables are cleared for the duration of the call
    /// (unless disabled in the configuration) and restored on every exit
    /// path, including cancellation.
    pub async fn call(
        &self,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> Result<CallOutput, DispatchError> {
        let call_id = CallId::new_random();
        let span = info_span!("llm.call", %call_id, json_mode = options.json_mode);

        async {
            if !self.is_configured() {
                error!("dispatch client is not configured; refusing call");
                return Err(DispatchError::NotConfigured);
            }
            if messages.is_empty() {
                return Err(DispatchError::InvalidRequest {
                    reason: "at least one message is required".to_string(),
                });
            }

            let _proxy = self
                .config
                .suppress_proxy_env
                .then(ProxyEnvGuard::acquire);

            self.search(call_id, messages, options).await
        }
        .instrument(span)
        .await
    }

    async fn search(
        &self,
        call_id: CallId,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> Result<CallOutput, DispatchError> {
        let credentials = &self.config.credentials;
        let models = &self.config.models;
        let attempts_per_model = options.attempts_per_model();

        let mut attempts: u32 = 0;
        let mut last_error: Option<TransportError> = None;

        for (key_index, credential) in credentials.iter().enumerate() {
            info!(
                key = key_index + 1,
                of = credentials.len(),
                credential = %credential,
                "trying credential"
            );

            'models: for (model_index, model) in models.iter().enumerate() {
                info!(
                    %model,
                    position = model_index + 1,
                    of = models.len(),
                    "trying model"
                );
                let request = ChatRequest::for_candidate(model, messages, options);
                let mut delay = options.retry_delay;

                for attempt in 1..=attempts_per_model {
                    attempts += 1;
                    debug!(
                        key = key_index + 1,
                        %model,
                        attempt,
                        of = attempts_per_model,
                        "sending attempt"
                    );

                    let failure = match self.attempt(credential, &request, options).await {
                        Ok((payload, usage)) => {
                            info!(key = key_index + 1, %model, attempts, "dispatch call succeeded");
                            return Ok(CallOutput {
                                call_id,
                                model: model.clone(),
                                credential_index: key_index,
                                attempts,
                                payload,
                                usage,
                            });
                        }
                        Err(failure) => failure,
                    };

                    let policy = failure.kind.retry_policy();
                    warn!(
                        key = key_index + 1,
                        %model,
                        attempt,
                        of = attempts_per_model,
                        kind = %failure.kind,
                        ?policy,
                        error = %failure,
                        "attempt failed"
                    );
                    last_error = Some(failure);

                    match policy {
                        RetryPolicy::NextModel => continue 'models,
                        RetryPolicy::RetrySameTarget if attempt < attempts_per_model => {
                            info!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                            tokio::time::sleep(delay).await;
                            delay = next_delay(delay);
                        }
                        // Retries exhausted: the attempt loop ends and the next model is tried.
                        RetryPolicy::RetrySameTarget => {}
                    }
                }
            }
        }

        let last = last_error.as_ref().map(ToString::to_string);
        error!(
            attempts,
            last_error = last.as_deref(),
            "all credentials and models failed"
        );
        Err(DispatchError::Exhausted {
            attempts,
            last_error,
        })
    }

    /// One bounded network attempt plus response normalisation.
    async fn attempt(
        &self,
        credential: &Credential,
        request: &ChatRequest,
        options: &CallOptions,
    ) -> Result<(Map<String, Value>, Option<Usage>), TransportError> {
        let pending = self.transport.complete(credential, request);
        let completion = match tokio::time::timeout(options.timeout, pending).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::timed_out(options.timeout)),
        };

        let ChatCompletion { content, usage } = completion;
        if !options.json_mode {
            return Ok((text_payload(content, usage.as_ref()), usage));
        }

        match json_payload(&content, usage.as_ref()) {
            Ok(payload) => Ok((payload, usage)),
            Err(reason) => {
                debug!(content = %preview(&content), "strict-JSON content rejected");
                Err(TransportError::parse(reason))
            }
        }
    }
}

fn next_delay(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

fn preview(text: &str) -> String {
    text.chars().take(CONTENT_PREVIEW_CHARS).collect()
}
