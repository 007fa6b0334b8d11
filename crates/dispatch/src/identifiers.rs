//! Newtype identifiers.
//!
//! A model identifier, an API credential, and a call correlation id are all
//! strings or UUIDs under the hood; wrapping them keeps a secret from being
//! passed where a model name is expected and keeps secrets out of log output.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ModelId
// ---------------------------------------------------------------------------

/// Identifies a selectable backend model variant (e.g.
/// `"Qwen/Qwen3-235B-A22B-Instruct-2507"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(String);

impl ModelId {
    /// Creates a model identifier, returning `None` if the value is blank.
    ///
    /// Surrounding whitespace is trimmed.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == v.len() {
            Some(Self(v))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits a comma-separated list into model identifiers, skipping blanks.
    pub fn parse_list(raw: &str) -> Vec<ModelId> {
        raw.split(',').filter_map(ModelId::new).collect()
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// An opaque API secret.
///
/// `Debug` and `Display` both render the masked form returned by
/// [`Credential::masked`]; the raw value is only reachable through
/// [`Credential::expose`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Creates a credential, returning `None` if the value is blank.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Returns the raw secret. Only transports should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns a log-safe rendering: the first 8 characters, `...`, and the
    /// last 4 characters. Keys of 12 characters or fewer show `****` as the
    /// tail.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let head: String = chars.iter().take(8).collect();
        let tail: String = if chars.len() > 12 {
            chars[chars.len() - 4..].iter().collect()
        } else {
            "****".to_string()
        };
        format!("{head}...{tail}")
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single `call` invocation.
///
/// Generated fresh for every call; recorded on the call's tracing span and on
/// the returned output so all attempts of one search can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Generates a new random call identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
