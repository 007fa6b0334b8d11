//! Ordered search spaces for a dispatch call: credentials and model candidates.
//!
//! Both lists are fixed at client construction and never mutated afterwards.

use std::collections::HashSet;

use crate::{Credential, ModelId};

/// Models tried when the configuration names none, or names only one.
pub const BUILTIN_FALLBACK_MODELS: &[&str] = &[
    "Qwen/Qwen3-235B-A22B-Instruct-2507",
    "Qwen/Qwen3-Next-80B-A3B-Instruct",
    "deepseek-ai/DeepSeek-V3.2",
    "Qwen/Qwen3-Coder-480B-A35B-Instruct",
];

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Ordered, deduplicated API credentials. May be empty, in which case the
/// owning client is unconfigured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet(Vec<Credential>);

impl CredentialSet {
    /// Builds the set from raw secrets, dropping blanks and later duplicates.
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let keys = raw
            .into_iter()
            .filter_map(Credential::new)
            .filter(|key| seen.insert(key.clone()))
            .collect();
        Self(keys)
    }

    /// Splits a comma-separated list of secrets.
    pub fn parse_list(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Credential> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a CredentialSet {
    type Item = &'a Credential;
    type IntoIter = std::slice::Iter<'a, Credential>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Model candidates
// ---------------------------------------------------------------------------

/// Priority-ordered model identifiers tried under each credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCandidates(Vec<ModelId>);

impl ModelCandidates {
    /// Merges the candidate order.
    ///
    /// - An empty `configured` list is replaced by `builtin`.
    /// - A single configured model is followed by `builtin`, so a rate limit
    ///   on that model can still switch.
    /// - Two or more configured models are used as given.
    /// - `requested`, when present, always goes first.
    ///
    /// Duplicates are removed keeping the first occurrence.
    pub fn merge(requested: Option<&ModelId>, configured: &[ModelId], builtin: &[ModelId]) -> Self {
        let tail: Vec<&ModelId> = match configured.len() {
            0 => builtin.iter().collect(),
            1 => configured.iter().chain(builtin).collect(),
            _ => configured.iter().collect(),
        };

        let mut seen = HashSet::new();
        let models = requested
            .into_iter()
            .chain(tail)
            .filter(|model| seen.insert(*model))
            .cloned()
            .collect();
        Self(models)
    }

    /// The built-in fallback list as model identifiers.
    pub fn builtin() -> Vec<ModelId> {
        BUILTIN_FALLBACK_MODELS
            .iter()
            .copied()
            .filter_map(ModelId::new)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelId> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a ModelCandidates {
    type Item = &'a ModelId;
    type IntoIter = std::slice::Iter<'a, ModelId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
