//! Runtime configuration consumed by the verification pipeline.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Where the config comes from (file, host settings UI, env) is the host's
//! concern; the pipeline only reads plain values.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Inject verified section text for citations in the user's query.
    pub direct_lookup: bool,
    /// Verify citations in generated text and force corrections.
    pub post_validation: bool,
    /// Carry legislative history into records and injected context.
    pub legislative_history: bool,

    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,

    pub breaker_failure_threshold: u32,
    pub breaker_open_timeout_secs: u64,

    /// Lookup budget per citation; a batch gets `n × this`, capped below.
    pub per_citation_timeout_ms: u64,
    pub lookup_timeout_cap_ms: u64,

    /// Queries shorter than this (in chars) skip pre-flight.
    pub min_message_length: usize,
    /// Pre-flight runs only when the query contains one of these (case-insensitive).
    pub legal_keywords: Vec<String>,

    /// Warm the cache with citations from recent conversation turns.
    pub context_preload: bool,
    pub max_context_messages: usize,

    /// Consult the fallback extractor when pattern extraction finds nothing.
    pub fallback_extraction: bool,
    pub fallback_timeout_ms: u64,

    /// Upper bound on pending pre-flight results awaiting post-flight.
    pub correlator_capacity: usize,
    /// User text longer than this is truncated before it is embedded in a prompt.
    pub max_input_chars: usize,

    /// Log metrics, cache and breaker state after each post-flight.
    pub show_performance_metrics: bool,

    /// Regex templates for contradiction detection; `None` uses the built-in table.
    pub contradiction_templates: Option<Vec<String>>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            direct_lookup: true,
            post_validation: true,
            legislative_history: true,
            cache_ttl_secs: 3600,
            cache_capacity: 1000,
            breaker_failure_threshold: 5,
            breaker_open_timeout_secs: 60,
            per_citation_timeout_ms: 5_000,
            lookup_timeout_cap_ms: 30_000,
            min_message_length: 10,
            legal_keywords: ["code", "section", "law", "statute", "pen", "civ", "§"]
                .into_iter()
                .map(String::from)
                .collect(),
            context_preload: true,
            max_context_messages: 5,
            fallback_extraction: false,
            fallback_timeout_ms: 5_000,
            correlator_capacity: 100,
            max_input_chars: 10_000,
            show_performance_metrics: false,
            contradiction_templates: None,
        }
    }
}

impl GuardConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Cache TTL, clamped to one minute ..= one day.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.clamp(60, 86_400))
    }

    pub fn breaker_open_timeout(&self) -> Duration {
        Duration::from_secs(self.breaker_open_timeout_secs)
    }

    pub fn per_citation_timeout(&self) -> Duration {
        Duration::from_millis(self.per_citation_timeout_ms.max(1))
    }

    pub fn lookup_timeout_cap(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_cap_ms.max(1))
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms.max(1))
    }

    /// Whether `text` mentions any configured legal keyword.
    pub fn has_legal_keyword(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.legal_keywords
            .iter()
            .any(|kw| lower.contains(&kw.to_lowercase()))
    }
}
