//! Pre-flight enrichment and post-flight verification around a generation step.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use citeguard_core::{
    Citation, CodeId, GuardConfig, SectionSource, extract, extract_spans, fingerprint,
};
use citeguard_store::{FetchReport, SectionLookup};
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::annotate::{annotate, strip_annotations};
use crate::contradiction::{ContradictionError, ContradictionTable, correction_text};
use crate::correlator::RequestCorrelator;
use crate::enrich::{build_enriched_query, recover_question, sanitize_user_input, unsanitize};
use crate::fallback::{
    FallbackExtractor, seems_to_reference_citations, validate_fallback_citations,
};
use crate::message::{ChatMessage, ChatRequest, CorrelationMeta, Role};
use crate::metrics::{Counter, Metrics, MetricsSnapshot};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Contradiction(#[from] ContradictionError),
}

/// Result of pre-flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// The text to hand to generation: enriched, or the query unchanged.
    pub text: String,
    /// Present only when the query was enriched.
    pub correlation: Option<CorrelationMeta>,
}

impl Prepared {
    fn unchanged(query: &str) -> Self {
        Self {
            text: query.to_string(),
            correlation: None,
        }
    }
}

pub struct VerificationPipeline {
    config: GuardConfig,
    lookup: SectionLookup,
    correlator: RequestCorrelator,
    contradictions: ContradictionTable,
    metrics: Metrics,
    fallback: Option<Arc<dyn FallbackExtractor>>,
}

impl VerificationPipeline {
    /// Pipeline over `source` with cache, breaker and correlator sized from `config`.
    pub fn new(
        config: GuardConfig,
        source: Arc<dyn SectionSource>,
    ) -> Result<Self, PipelineError> {
        let lookup = SectionLookup::from_config(source, &config);
        Self::with_lookup(config, lookup)
    }

    pub fn with_lookup(config: GuardConfig, lookup: SectionLookup) -> Result<Self, PipelineError> {
        let contradictions = ContradictionTable::from_config(&config)?;
        Ok(Self {
            correlator: RequestCorrelator::new(config.correlator_capacity),
            config,
            lookup,
            contradictions,
            metrics: Metrics::default(),
            fallback: None,
        })
    }

    /// Install a secondary extractor; used only when `fallback_extraction` is on.
    pub fn with_fallback(mut self, extractor: Arc<dyn FallbackExtractor>) -> Self {
        self.fallback = Some(extractor);
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn lookup(&self) -> &SectionLookup {
        &self.lookup
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ── Host lifecycle ──

    /// Pre-flight over the last message when it is a user turn.
    pub async fn inlet(&self, mut request: ChatRequest) -> ChatRequest {
        if let Some((last, history)) = request.messages.split_last_mut() {
            if last.role == Role::User {
                if self.config.context_preload {
                    guarded("context preload", self.preload_context(history), || ()).await;
                }
                let prepared = self.prepare(&last.content).await;
                if let Some(meta) = prepared.correlation {
                    last.content = prepared.text;
                    last.metadata = Some(meta);
                }
            }
        }
        request
    }

    /// Post-flight over the last message when it is an assistant turn.
    pub async fn outlet(&self, mut request: ChatRequest) -> ChatRequest {
        let streaming = request.stream;
        if let Some((last, history)) = request.messages.split_last_mut() {
            if last.role == Role::Assistant {
                last.content = self.review(&last.content, history, streaming).await;
            }
        }
        request
    }

    // ── Pre-flight ──

    /// Enrich `query` with verified section text for the citations it names.
    ///
    /// Never fails: any panic inside is logged and the query passes through.
    pub async fn prepare(&self, query: &str) -> Prepared {
        guarded("pre-flight", self.prepare_inner(query), || {
            Prepared::unchanged(query)
        })
        .await
    }

    async fn prepare_inner(&self, query: &str) -> Prepared {
        self.metrics.incr(Counter::TotalQueries);

        if !self.config.direct_lookup {
            return Prepared::unchanged(query);
        }
        if query.chars().count() < self.config.min_message_length {
            self.metrics.incr(Counter::SkippedShort);
            debug!("query too short, skipping pre-flight");
            return Prepared::unchanged(query);
        }
        if !self.config.has_legal_keyword(query) {
            self.metrics.incr(Counter::SkippedNoLegal);
            debug!("no legal keyword, skipping pre-flight");
            return Prepared::unchanged(query);
        }

        let mut citations = extract(query);
        if citations.is_empty() {
            citations = self.fallback_citations(query).await;
        }
        if citations.is_empty() {
            debug!("no citations in query");
            return Prepared::unchanged(query);
        }
        self.metrics
            .add(Counter::CitationsDetected, citations.len() as u64);

        let report = self.lookup.fetch(&citations).await;
        self.record_fetch(&report);
        let records = report.into_records();
        if records.is_empty() {
            info!(
                citations = citations.len(),
                "no requested section could be verified, query unchanged"
            );
            return Prepared::unchanged(query);
        }

        let question = sanitize_user_input(query, self.config.max_input_chars);
        let enriched =
            build_enriched_query(&records, &question, self.config.legislative_history);

        let meta = CorrelationMeta {
            request_key: fingerprint(query),
            enriched_hash: fingerprint(&enriched),
            verified_sections: records.iter().map(|r| r.canonical()).collect(),
        };
        // The question as post-flight recovers it: trimmed, truncated, escapes undone.
        let recovered_key = fingerprint(&unsanitize(&question));
        self.correlator.store(
            &[
                meta.enriched_hash.clone(),
                meta.request_key.clone(),
                recovered_key,
            ],
            Arc::new(records),
        );
        info!(
            sections = ?meta.verified_sections,
            request_key = &meta.request_key[..8],
            "injected verified sections"
        );

        Prepared {
            text: enriched,
            correlation: Some(meta),
        }
    }

    async fn fallback_citations(&self, query: &str) -> Vec<Citation> {
        let Some(extractor) = self.fallback.as_ref() else {
            return Vec::new();
        };
        if !self.config.fallback_extraction || !seems_to_reference_citations(query) {
            return Vec::new();
        }

        let timeout = self.config.fallback_timeout();
        match tokio::time::timeout(timeout, extractor.extract(query)).await {
            Ok(Ok(raw)) => {
                let citations = validate_fallback_citations(&raw);
                if citations.len() < raw.len() {
                    warn!(
                        returned = raw.len(),
                        kept = citations.len(),
                        "fallback extractor returned invalid citations"
                    );
                }
                citations
            }
            Ok(Err(err)) => {
                warn!(error = %err, "fallback extraction failed");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "fallback extraction timed out"
                );
                Vec::new()
            }
        }
    }

    /// Warm the cache with citations from recent turns.
    async fn preload_context(&self, history: &[ChatMessage]) {
        let recent = history
            .iter()
            .rev()
            .take(self.config.max_context_messages);

        let mut seen: HashSet<(CodeId, String)> = HashSet::new();
        let mut citations = Vec::new();
        for message in recent {
            for citation in extract(&strip_annotations(&message.content)) {
                if seen.insert((citation.code, citation.section.clone())) {
                    citations.push(citation);
                }
            }
        }
        if citations.is_empty() {
            return;
        }

        debug!(citations = citations.len(), "preloading context citations");
        let report = self.lookup.fetch(&citations).await;
        self.record_fetch(&report);
    }

    // ── Post-flight ──

    /// Verify the citations in `generated`, or replace it with a correction
    /// when it contradicts a section verified during pre-flight.
    ///
    /// `history` is the conversation before the generated turn. Streaming
    /// responses are returned untouched.
    pub async fn review(
        &self,
        generated: &str,
        history: &[ChatMessage],
        streaming: bool,
    ) -> String {
        guarded(
            "post-flight",
            self.review_inner(generated, history, streaming),
            || generated.to_string(),
        )
        .await
    }

    async fn review_inner(
        &self,
        generated: &str,
        history: &[ChatMessage],
        streaming: bool,
    ) -> String {
        if !self.config.post_validation {
            return generated.to_string();
        }
        if streaming {
            debug!("streaming response, skipping post-flight");
            return generated.to_string();
        }

        match self.correlator.resolve(&correlation_candidates(history)) {
            Some(verified) => {
                if let Some(record) = self.contradictions.first_contradicted(generated, &verified) {
                    warn!(
                        code = %record.code,
                        section = %record.section,
                        "response contradicts verified section, replacing it"
                    );
                    self.metrics.incr(Counter::ContradictionsCorrected);
                    return correction_text(record);
                }
            }
            None => debug!("no pre-flight result for this response, verifying citations only"),
        }

        let base = strip_annotations(generated);
        let matches = extract_spans(&base);
        if matches.is_empty() {
            self.log_metrics();
            return generated.to_string();
        }

        let citations: Vec<Citation> = matches.iter().map(|m| m.citation.clone()).collect();
        let report = self.lookup.fetch(&citations).await;
        self.record_fetch(&report);

        let verified: Vec<bool> = report
            .lookups
            .iter()
            .map(|l| l.outcome.is_verified())
            .collect();
        let verified_count = report.verified_count();
        let not_found = report.not_found_count();
        self.metrics
            .add(Counter::CitationsValidated, verified_count as u64);
        self.metrics
            .add(Counter::HallucinationsFound, not_found as u64);

        info!(
            verified = verified_count,
            unverified = report.unverified_count(),
            not_found,
            "citations checked"
        );

        let annotated = annotate(&base, &matches, &verified);
        self.log_metrics();
        annotated
    }

    fn record_fetch(&self, report: &FetchReport) {
        self.metrics.add(Counter::CacheHits, report.cache_hits);
        self.metrics.add(Counter::CacheMisses, report.cache_misses);
        self.metrics.add(Counter::SourceErrors, report.source_errors);
        self.metrics.add(Counter::BreakerBlocks, report.breaker_blocks);
    }

    fn log_metrics(&self) {
        if !self.config.show_performance_metrics {
            return;
        }
        let m = self.metrics.snapshot();
        let cache = self.lookup.cache().stats();
        info!(
            total_queries = m.total_queries,
            citations_validated = m.citations_validated,
            hallucinations_found = m.hallucinations_found,
            contradictions_corrected = m.contradictions_corrected,
            source_errors = m.source_errors,
            cache_size = cache.size,
            cache_hit_rate = format!("{:.1}%", cache.hit_rate),
            breaker = %self.lookup.breaker().state(),
            pending_requests = self.correlator.len(),
            "pipeline metrics"
        );
    }
}

/// Fingerprints to try at post-flight, best first.
///
/// Prior user turns as they appear now, then host-preserved metadata, then
/// the question recovered from an enriched turn.
fn correlation_candidates(history: &[ChatMessage]) -> Vec<String> {
    let user_turns = || history.iter().rev().filter(|m| m.role == Role::User);

    let mut keys: Vec<String> = user_turns().map(|m| fingerprint(&m.content)).collect();
    for message in history.iter().rev() {
        if let Some(meta) = &message.metadata {
            keys.push(meta.enriched_hash.clone());
            keys.push(meta.request_key.clone());
        }
    }
    keys.extend(
        user_turns()
            .filter_map(|m| recover_question(&m.content))
            .map(|q| fingerprint(&q)),
    );
    keys
}

/// Run `fut`, turning a panic into an error log plus `fallback()`.
async fn guarded<T>(
    phase: &'static str,
    fut: impl Future<Output = T>,
    fallback: impl FnOnce() -> T,
) -> T {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => value,
        Err(panic) => {
            error!(
                phase,
                panic = panic_message(panic.as_ref()),
                "verification step panicked, passing input through"
            );
            fallback()
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
