//! Host-facing verification pipeline.
//!
//! A chat host calls [`VerificationPipeline::inlet`] before generation and
//! [`VerificationPipeline::outlet`] after it. The two calls share nothing but
//! process-wide state: the section cache, the circuit breaker, and the
//! [`RequestCorrelator`] that pairs them by content fingerprint.

pub mod annotate;
pub mod contradiction;
pub mod correlator;
pub mod enrich;
pub mod fallback;
pub mod message;
pub mod metrics;
pub mod pipeline;

pub use contradiction::{ContradictionError, ContradictionTable};
pub use correlator::{RequestCorrelator, VerifiedSet};
pub use fallback::{FallbackExtractor, RawCitation};
pub use message::{ChatMessage, ChatRequest, CorrelationMeta, Role};
pub use metrics::{Counter, Metrics, MetricsSnapshot};
pub use pipeline::{PipelineError, Prepared, VerificationPipeline};
