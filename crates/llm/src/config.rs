//! Client configuration and its resolution order.
//!
//! Every setting is resolved once, when the client is built:
//! explicit [`ClientSettings`] value, then the environment, then the built-in
//! default. Nothing is re-read per call.

use dispatch::{CredentialSet, ModelCandidates, ModelId};

/// Comma-separated API credentials.
pub const API_KEY_ENV: &str = "MODELSCOPE_API_KEY";
/// Base URL override.
pub const API_BASE_ENV: &str = "MODELSCOPE_API_BASE";
/// Comma-separated model candidates. The first entry is also the default
/// requested model.
pub const TEXT_MODELS_ENV: &str = "MODELSCOPE_TEXT_MODELS";

pub const DEFAULT_API_BASE: &str = "https://api-inference.modelscope.cn/v1";

/// Explicit constructor arguments. Unset fields fall back to the environment.
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    api_keys: Vec<String>,
    api_token: Option<String>,
    base_url: Option<String>,
    model_name: Option<String>,
    suppress_proxy_env: Option<bool>,
}

impl ClientSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Several credentials, tried in order. Takes precedence over
    /// [`ClientSettings::api_token`].
    pub fn api_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.api_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// A single credential.
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Model tried first under every credential.
    pub fn model_name(mut self, model: impl Into<String>) -> Self {
        self.model_name = Some(model.into());
        self
    }

    /// Whether calls clear proxy environment variables while in flight.
    /// Defaults to `true`.
    pub fn suppress_proxy_env(mut self, enabled: bool) -> Self {
        self.suppress_proxy_env = Some(enabled);
        self
    }
}

/// Fully resolved, read-only client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: CredentialSet,
    pub base_url: String,
    /// Model placed first in [`ClientConfig::models`].
    pub primary_model: Option<ModelId>,
    pub models: ModelCandidates,
    pub suppress_proxy_env: bool,
}

impl ClientConfig {
    /// Resolves `settings` against an environment lookup.
    ///
    /// `env` returns `None` for unset variables; blank values should also be
    /// reported as `None`.
    pub fn resolve<F>(settings: ClientSettings, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit_keys = CredentialSet::new(settings.api_keys);
        let credentials = if !explicit_keys.is_empty() {
            explicit_keys
        } else if let Some(token) = settings.api_token {
            CredentialSet::new([token])
        } else {
            env(API_KEY_ENV)
                .map(|raw| CredentialSet::parse_list(&raw))
                .unwrap_or_default()
        };

        let base_url = settings
            .base_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| env(API_BASE_ENV))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let configured = env(TEXT_MODELS_ENV)
            .map(|raw| ModelId::parse_list(&raw))
            .unwrap_or_default();
        let builtin = ModelCandidates::builtin();

        let primary_model = settings
            .model_name
            .and_then(ModelId::new)
            .or_else(|| configured.first().cloned())
            .or_else(|| builtin.first().cloned());

        let models = ModelCandidates::merge(primary_model.as_ref(), &configured, &builtin);

        Self {
            credentials,
            base_url: base_url.trim().to_string(),
            primary_model,
            models,
            suppress_proxy_env: settings.suppress_proxy_env.unwrap_or(true),
        }
    }

    /// Resolves `settings` against the process environment, loading a `.env`
    /// file first. Variables already set are not overridden by the file.
    pub fn from_process_env(settings: ClientSettings) -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        Self::resolve(settings, non_empty_env_var)
    }

    /// `true` when at least one credential is available.
    pub fn is_configured(&self) -> bool {
        !self.credentials.is_empty()
    }
}

fn non_empty_env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
