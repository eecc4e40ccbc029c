//! Fetch-by-citation adapter: cache first, then the source behind the breaker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use citeguard_core::{
    Citation, FetchOutcome, GuardConfig, SectionPayload, SectionRecord, SectionSource,
};
use tracing::{debug, info, warn};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::cache::SectionCache;

/// Why a citation could not be checked against the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    CircuitOpen,
    Transport(String),
    /// The source answered with a section from a different code.
    CodeMismatch { returned: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Verified(SectionRecord),
    /// The source answered and has no such section.
    NotFound,
    Unavailable(Unavailable),
}

impl LookupOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, LookupOutcome::Verified(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationLookup {
    pub citation: Citation,
    pub outcome: LookupOutcome,
}

/// Per-citation outcomes of one batch, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub lookups: Vec<CitationLookup>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub source_errors: u64,
    pub breaker_blocks: u64,
    /// The batch budget elapsed before every citation was looked up.
    pub timed_out: bool,
}

impl FetchReport {
    pub fn records(&self) -> impl Iterator<Item = &SectionRecord> {
        self.lookups.iter().filter_map(|l| match &l.outcome {
            LookupOutcome::Verified(record) => Some(record),
            _ => None,
        })
    }

    pub fn into_records(self) -> Vec<SectionRecord> {
        self.lookups
            .into_iter()
            .filter_map(|l| match l.outcome {
                LookupOutcome::Verified(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn verified_count(&self) -> usize {
        self.records().count()
    }

    pub fn not_found_count(&self) -> usize {
        self.lookups
            .iter()
            .filter(|l| l.outcome == LookupOutcome::NotFound)
            .count()
    }

    pub fn unverified_count(&self) -> usize {
        self.lookups.len() - self.verified_count()
    }
}

#[derive(Debug, Clone)]
pub struct LookupOptions {
    pub per_citation_timeout: Duration,
    pub timeout_cap: Duration,
    /// Keep legislative history on fetched records.
    pub legislative_history: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            per_citation_timeout: Duration::from_secs(5),
            timeout_cap: Duration::from_secs(30),
            legislative_history: true,
        }
    }
}

impl LookupOptions {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self {
            per_citation_timeout: config.per_citation_timeout(),
            timeout_cap: config.lookup_timeout_cap(),
            legislative_history: config.legislative_history,
        }
    }

    /// Budget for a batch of `n` citations: `n × per_citation_timeout`, capped.
    pub fn budget(&self, n: usize) -> Duration {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        self.per_citation_timeout
            .saturating_mul(n)
            .min(self.timeout_cap)
    }
}

pub struct SectionLookup {
    source: Arc<dyn SectionSource>,
    cache: Arc<SectionCache>,
    breaker: Arc<CircuitBreaker>,
    options: LookupOptions,
}

impl SectionLookup {
    pub fn new(
        source: Arc<dyn SectionSource>,
        cache: Arc<SectionCache>,
        breaker: Arc<CircuitBreaker>,
        options: LookupOptions,
    ) -> Self {
        Self {
            source,
            cache,
            breaker,
            options,
        }
    }

    /// Build a lookup with a fresh cache and breaker sized from `config`.
    pub fn from_config(source: Arc<dyn SectionSource>, config: &GuardConfig) -> Self {
        let cache = SectionCache::new(config.cache_capacity, config.cache_ttl());
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            open_timeout: config.breaker_open_timeout(),
        });
        Self::new(
            source,
            Arc::new(cache),
            Arc::new(breaker),
            LookupOptions::from_config(config),
        )
    }

    pub fn cache(&self) -> &SectionCache {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Look up every citation in order under the batch budget.
    ///
    /// When the budget elapses the in-flight call is abandoned, one breaker
    /// failure is recorded, and the citations not yet reached are reported
    /// as [`Unavailable::TimedOut`].
    pub async fn fetch(&self, citations: &[Citation]) -> FetchReport {
        let mut report = FetchReport::default();
        if citations.is_empty() {
            return report;
        }

        let budget = self.options.budget(citations.len());
        let run = self.fetch_sequential(citations, &mut report);
        if tokio::time::timeout(budget, run).await.is_err() {
            let done = report.lookups.len();
            warn!(
                source = self.source.name(),
                budget_ms = budget.as_millis() as u64,
                completed = done,
                total = citations.len(),
                "section lookup batch timed out"
            );
            self.breaker.record_failure();
            report.timed_out = true;
            report
                .lookups
                .extend(citations[done..].iter().map(|c| CitationLookup {
                    citation: c.clone(),
                    outcome: LookupOutcome::Unavailable(Unavailable::TimedOut),
                }));
        }
        report
    }

    async fn fetch_sequential(&self, citations: &[Citation], report: &mut FetchReport) {
        for citation in citations {
            let outcome = self.fetch_one(citation, report).await;
            report.lookups.push(CitationLookup {
                citation: citation.clone(),
                outcome,
            });
        }
    }

    async fn fetch_one(&self, citation: &Citation, report: &mut FetchReport) -> LookupOutcome {
        let (code, section) = citation.key();

        if let Some(record) = self.cache.get(code, section) {
            report.cache_hits += 1;
            debug!(code = %code, section, "section served from cache");
            return LookupOutcome::Verified(record);
        }
        report.cache_misses += 1;

        // An unsettled permit (cancelled or panicked call) never holds the trial slot.
        let Some(permit) = self.breaker.try_acquire() else {
            report.breaker_blocks += 1;
            debug!(code = %code, section, "circuit open, skipping source call");
            return LookupOutcome::Unavailable(Unavailable::CircuitOpen);
        };

        match self.source.fetch_section(code, section).await {
            Ok(FetchOutcome::Found(payload)) => {
                permit.succeed();
                let payload = if self.options.legislative_history {
                    payload
                } else {
                    strip_history(payload)
                };
                let returned = payload.code.clone();
                match payload.into_record(code, Utc::now()) {
                    Some(record) => {
                        self.cache.set(code, section, record.clone());
                        info!(code = %code, section, "section verified");
                        LookupOutcome::Verified(record)
                    }
                    None => {
                        warn!(
                            requested = %code,
                            returned = %returned,
                            section,
                            "source returned a section from another code, discarding"
                        );
                        LookupOutcome::Unavailable(Unavailable::CodeMismatch { returned })
                    }
                }
            }
            Ok(FetchOutcome::NotFound) => {
                permit.succeed();
                info!(code = %code, section, "section not found in source");
                LookupOutcome::NotFound
            }
            Err(err) => {
                permit.fail();
                report.source_errors += 1;
                warn!(
                    source = self.source.name(),
                    code = %code,
                    section,
                    error = %err,
                    "section source call failed"
                );
                LookupOutcome::Unavailable(Unavailable::Transport(err.to_string()))
            }
        }
    }
}

fn strip_history(mut payload: SectionPayload) -> SectionPayload {
    payload.legislative_history = None;
    for version in &mut payload.versions {
        version.legislative_history = None;
    }
    payload
}
