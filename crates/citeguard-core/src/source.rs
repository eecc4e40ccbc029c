//! Contract every authoritative section backend satisfies.

use async_trait::async_trait;
use thiserror::Error;

use crate::codes::CodeId;
use crate::section::SectionPayload;

/// Classification of a successful round-trip to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The source returned a section body. Its `code` still has to be checked.
    Found(SectionPayload),
    /// The source answered and has no such section.
    NotFound,
}

/// Transport or protocol failure talking to the source.
///
/// A missing section is not an error; see [`FetchOutcome::NotFound`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("source returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed section payload: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Fetch-by-citation access to an authoritative statute store.
///
/// Implementations perform exactly one lookup per call and never retry;
/// caching and failure isolation live in the caller.
#[async_trait]
pub trait SectionSource: Send + Sync {
    /// Short backend name for logs ("http", "duckdb", ...).
    fn name(&self) -> &str;

    async fn fetch_section(
        &self,
        code: CodeId,
        section: &str,
    ) -> Result<FetchOutcome, SourceError>;
}
