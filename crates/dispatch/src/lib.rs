//! Domain layer for multi-credential, multi-model LLM dispatch.
//!
//! This crate contains every value type, identifier, failure classification,
//! and port trait used by the dispatch search. Infrastructure crates implement
//! the traits defined here; they never add classification rules of their own.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* a chat attempt needs; infrastructure crates define *how*
//! to carry it over the wire.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ModelId`, `Credential`, `CallId`) |
//! | [`types`] | Messages, call options, usage, requests and call output |
//! | [`errors`] | Failure taxonomy, retry policy, transport and dispatch errors |
//! | [`candidates`] | Credential set and model candidate ordering |
//! | [`transport`] | The [`ChatTransport`] port |

pub mod candidates;
pub mod errors;
pub mod identifiers;
pub mod transport;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use candidates::{CredentialSet, ModelCandidates, BUILTIN_FALLBACK_MODELS};
pub use errors::{DispatchError, FailureKind, RetryPolicy, TransportError};
pub use identifiers::{CallId, Credential, ModelId};
pub use transport::ChatTransport;
pub use types::{
    json_payload, text_payload, CallOptions, CallOutput, ChatCompletion, ChatMessage, ChatRequest,
    ResponseFormat, Role, TokenCount, Usage, PROTOCOL_PLACEHOLDER_MODEL, USAGE_FIELD,
};
