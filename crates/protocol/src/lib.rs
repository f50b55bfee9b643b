//! # CodeWeaver Protocol
//!
//! Wire types shared between the query orchestrator, the indexer, and the
//! server's management surface: the `find_code` request/response contract,
//! structured error envelopes, and the small set of configuration shapes the
//! rest of the workspace deserializes (loading them from files/env/flags is
//! an external, out-of-scope concern — see spec.md §1).

pub mod path_filters;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Intent hint that biases importance-vector ranking during retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Discovery,
    Comprehension,
    Modification,
    Debugging,
    Documentation,
}

/// Input to the single agent-facing operation.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FindCodeRequest {
    pub query: String,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    #[serde(default)]
    pub focus_languages: Option<HashSet<String>>,
}

const fn default_token_limit() -> usize {
    30_000
}

impl FindCodeRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            intent: None,
            token_limit: default_token_limit(),
            focus_languages: None,
        }
    }
}

/// One ranked code span.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FindCodeResult {
    pub file: String,
    pub line_start: usize,
    pub line_end: usize,
    pub language: String,
    pub snippet: String,
    pub metadata: ResultMetadata,
}

/// Subset of chunk metadata surfaced to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ResultMetadata {
    pub classification: Option<String>,
    pub name: Option<String>,
    pub intent_score: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FailoverInfo {
    pub enabled: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FindCodeMetadata {
    pub intent: Option<Intent>,
    pub filters: Vec<String>,
    pub failover: FailoverInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FindCodeResponse {
    pub results: Vec<FindCodeResult>,
    pub total: usize,
    pub took_ms: u64,
    pub metadata: FindCodeMetadata,
}

impl FindCodeResponse {
    /// Structured empty response used for `ServiceUnavailable`/`QueryFailure`.
    pub fn unavailable(intent: Option<Intent>, failover: FailoverInfo) -> Self {
        Self {
            results: Vec::new(),
            total: 0,
            took_ms: 0,
            metadata: FindCodeMetadata {
                intent,
                filters: Vec::new(),
                failover,
            },
        }
    }
}

/// Structured error surfaced across crate boundaries and to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Three-valued configuration intent: explicitly set, explicitly cleared by
/// the user, or never mentioned. Collapsing this to `Option<T>` would make
/// "unset by user" indistinguishable from "user never touched this field",
/// which matters for fields like `force_delimiter_for_languages` where an
/// empty-but-explicit override must suppress a non-empty default.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Setting<T> {
    Set(T),
    ExplicitlyUnset,
    Absent,
}

impl<T> Setting<T> {
    pub fn or_default(self, default: T) -> T {
        match self {
            Setting::Set(value) => value,
            Setting::ExplicitlyUnset | Setting::Absent => default,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Setting::Absent)
    }
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Setting::Absent
    }
}

pub fn serialize_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_code_request_defaults() {
        let req = FindCodeRequest::new("error handling");
        assert_eq!(req.token_limit, 30_000);
        assert!(req.intent.is_none());
        assert!(req.focus_languages.is_none());
    }

    #[test]
    fn setting_or_default() {
        let set: Setting<usize> = Setting::Set(5);
        let unset: Setting<usize> = Setting::ExplicitlyUnset;
        let absent: Setting<usize> = Setting::Absent;
        assert_eq!(set.or_default(10), 5);
        assert_eq!(unset.or_default(10), 10);
        assert_eq!(absent.or_default(10), 10);
        assert!(absent.is_absent());
        assert!(!unset.is_absent());
    }

    #[test]
    fn unavailable_response_has_no_results() {
        let resp = FindCodeResponse::unavailable(
            Some(Intent::Debugging),
            FailoverInfo {
                enabled: true,
                active: true,
            },
        );
        assert!(resp.results.is_empty());
        assert_eq!(resp.total, 0);
    }
}
