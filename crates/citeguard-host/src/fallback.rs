//! Extension point for a secondary, model-based citation extractor.
//!
//! Nothing here ships an extractor. When one is installed and enabled it is
//! consulted only after pattern extraction finds nothing, and its output is
//! validated like any other untrusted input.

use std::collections::HashSet;

use async_trait::async_trait;
use citeguard_core::{Citation, normalize_code_token};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An unvalidated `(code, section)` pair as reported by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCitation {
    pub code: String,
    pub section: String,
}

#[async_trait]
pub trait FallbackExtractor: Send + Sync {
    async fn extract(&self, query: &str) -> anyhow::Result<Vec<RawCitation>>;
}

const REFERENCE_KEYWORDS: &[&str] = &[
    "section",
    "code",
    "statute",
    "law",
    "earlier",
    "mentioned",
    "discussed",
    "rule",
    "provision",
    "pen",
    "civ",
    "fam",
    "evid",
    "gov",
    "corp",
    "prob",
    "ccp",
];

/// Cheap gate: does `query` look like it refers to some statute?
pub fn seems_to_reference_citations(query: &str) -> bool {
    let lower = query.to_lowercase();
    REFERENCE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Keep entries whose code resolves and whose section is well formed.
pub fn validate_fallback_citations(raw: &[RawCitation]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in raw {
        let Some(code) = normalize_code_token(&entry.code) else {
            debug!(code = %entry.code, "fallback citation has unsupported code");
            continue;
        };
        let citation = match Citation::new(code, &entry.section) {
            Ok(c) => c,
            Err(err) => {
                debug!(error = %err, "fallback citation rejected");
                continue;
            }
        };
        if seen.insert((citation.code, citation.section.clone())) {
            out.push(citation);
        }
    }
    out
}
