//! Failure taxonomy and retry-policy types for the dispatch domain.
//!
//! [`FailureKind`] is the tag every failed attempt carries. Transports set it
//! from structured signals (HTTP status, transport error class) and fall back
//! to [`FailureKind::classify_message`] only when no structured signal is
//! decisive. The dispatch loop never inspects error text itself; it asks the
//! kind for its [`RetryPolicy`].
//!
//! [`DispatchError`] is the external contract: callers only learn that a call
//! failed and why the search ended.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// What the search does after an attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Retry the same (credential, model) pair after the current backoff
    /// delay, if attempts remain; otherwise advance to the next model.
    RetrySameTarget,
    /// Abandon remaining attempts for this model and try the next one under
    /// the same credential. Once the model list is exhausted the search moves
    /// on to the next credential.
    NextModel,
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The credential is invalid, expired, or not permitted.
    Authentication,
    /// Quota or throughput limit exceeded for this model.
    RateLimit,
    /// Network failure, timeout, or server-side error.
    Transient,
    /// The response did not conform to the requested strict format.
    Parse,
    /// Anything else.
    Other,
}

const AUTH_PATTERNS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "authentication",
    "invalid api key",
    "invalid api_key",
    "api key",
];

const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "rate_limit", "429", "ratelimiterror"];

const TRANSIENT_PATTERNS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "internalservererror",
    "internal server error",
];

impl FailureKind {
    /// Decision table for an HTTP status code.
    ///
    /// Returns `None` for statuses that carry no classification on their own
    /// (e.g. 400, 404); callers then fall back to
    /// [`FailureKind::classify_message`].
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 | 403 => Some(Self::Authentication),
            429 => Some(Self::RateLimit),
            408 | 500..=599 => Some(Self::Transient),
            _ => None,
        }
    }

    /// Classifies free-form error text, case-insensitively.
    ///
    /// Authentication patterns win over rate-limit patterns, which win over
    /// transient patterns. Unmatched text is [`FailureKind::Other`].
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

        if matches(AUTH_PATTERNS) {
            Self::Authentication
        } else if matches(RATE_LIMIT_PATTERNS) {
            Self::RateLimit
        } else if matches(TRANSIENT_PATTERNS) {
            Self::Transient
        } else {
            Self::Other
        }
    }

    /// How the search proceeds after a failure of this kind.
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            Self::Authentication | Self::RateLimit | Self::Other => RetryPolicy::NextModel,
            Self::Transient | Self::Parse => RetryPolicy::RetrySameTarget,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::Transient => "transient",
            Self::Parse => "parse",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Attempt-level errors
// ---------------------------------------------------------------------------

/// A failed attempt, as reported by a transport or by response validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure{}: {message}", status_suffix(.status))]
pub struct TransportError {
    /// Classification driving the retry decision.
    pub kind: FailureKind,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Diagnostic text. Never contains the credential.
    pub message: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Builds an error for a non-success HTTP response.
    ///
    /// The status decides the kind when it can; otherwise the body text is
    /// classified.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        let kind = FailureKind::from_status(status)
            .unwrap_or_else(|| FailureKind::classify_message(&message));
        Self {
            kind,
            status: Some(status),
            message,
        }
    }

    /// Builds an error from text alone.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(FailureKind::classify_message(&message), message)
    }

    /// A single attempt exceeded its timeout.
    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            FailureKind::Transient,
            format!("attempt timed out after {}ms", after.as_millis()),
        )
    }

    /// Strict-JSON content failed to parse.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Parse, message)
    }
}

// ---------------------------------------------------------------------------
// Call-level errors
// ---------------------------------------------------------------------------

/// Why a dispatch call produced no output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// No credential was available at construction. No attempt was made.
    #[error("Dispatch client is not configured: no API credential available")]
    NotConfigured,

    /// The call arguments were unusable. No attempt was made.
    #[error("Invalid dispatch request: {reason}")]
    InvalidRequest {
        /// Description of the problem.
        reason: String,
    },

    /// Every credential, model, and retry combination failed.
    #[error(
        "All credentials and models failed after {attempts} attempts{}",
        last_error_suffix(.last_error)
    )]
    Exhausted {
        /// Number of network attempts made.
        attempts: u32,
        /// The last observed failure, kept for diagnostics.
        last_error: Option<TransportError>,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

fn last_error_suffix(last_error: &Option<TransportError>) -> String {
    last_error
        .as_ref()
        .map(|e| format!("; last error: {e}"))
        .unwrap_or_default()
}

impl DispatchError {
    /// Number of attempts made before the call gave up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::NotConfigured | Self::InvalidRequest { .. } => 0,
        }
    }
}
