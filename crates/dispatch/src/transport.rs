//! The port every chat-completion backend implements.

use async_trait::async_trait;

use crate::{ChatCompletion, ChatRequest, Credential, TransportError};

/// One network attempt against a chat-completion endpoint.
///
/// Implementations perform exactly one request per call and never retry on
/// their own; the dispatch search owns retry, backoff, and fallback. Every
/// failure must carry a [`FailureKind`](crate::FailureKind) chosen from
/// structured signals where the transport has them.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends `request` authorised by `credential`.
    async fn complete(
        &self,
        credential: &Credential,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, TransportError>;
}
