//! Core types for citeguard: code registry, citation extraction, section
//! records, the section source contract, and pipeline configuration.

pub mod citation;
pub mod codes;
pub mod config;
pub mod fingerprint;
pub mod section;
pub mod source;

pub use citation::{Citation, CitationMatch, extract, extract_spans, is_valid_section};
pub use codes::{CodeId, normalize_code_token};
pub use config::GuardConfig;
pub use fingerprint::fingerprint;
pub use section::{Hierarchy, SectionPayload, SectionRecord, SectionVersion};
pub use source::{FetchOutcome, SectionSource, SourceError};
