//! LLM dispatch infrastructure.
//!
//! Implements the [`dispatch::ChatTransport`] port for OpenAI-compatible
//! chat-completion endpoints and provides [`DispatchClient`], which searches
//! credentials × model candidates × retries until one attempt succeeds.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request formatting, response
//! parsing, environment configuration, proxy suppression, and exponential
//! back-off live here. The [`dispatch`] crate sees only
//! [`dispatch::ChatTransport`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | `ClientSettings` → `ClientConfig` resolution (explicit > env > built-in) |
//! | [`openai`] | reqwest-backed OpenAI-compatible transport |
//! | [`proxy`] | Scoped proxy-environment suppression |
//! | [`client`] | The `DispatchClient` search loop |

use std::sync::OnceLock;

use thiserror::Error;

pub mod client;
pub mod config;
pub mod openai;
pub mod proxy;

pub use client::DispatchClient;
pub use config::{ClientConfig, ClientSettings};
pub use openai::OpenAiCompatTransport;
pub use proxy::ProxyEnvGuard;

/// Errors raised while building infrastructure, before any call is made.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The HTTP client could not be constructed (e.g. TLS backend failure).
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

static DEFAULT_CLIENT: OnceLock<DispatchClient> = OnceLock::new();

/// Process-wide client built from the environment on first use.
///
/// A convenience for callers without their own wiring; prefer constructing a
/// [`DispatchClient`] and passing it explicitly.
pub fn default_client() -> Result<&'static DispatchClient, LlmError> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        return Ok(client);
    }
    let client = DispatchClient::from_env()?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client))
}
