use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    TotalQueries,
    SkippedShort,
    SkippedNoLegal,
    CitationsDetected,
    CitationsValidated,
    HallucinationsFound,
    ContradictionsCorrected,
    CacheHits,
    CacheMisses,
    SourceErrors,
    BreakerBlocks,
}

/// Process-wide pipeline counters.
#[derive(Debug, Default)]
pub struct Metrics {
    total_queries: AtomicU64,
    skipped_short: AtomicU64,
    skipped_no_legal: AtomicU64,
    citations_detected: AtomicU64,
    citations_validated: AtomicU64,
    hallucinations_found: AtomicU64,
    contradictions_corrected: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    source_errors: AtomicU64,
    breaker_blocks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub skipped_short: u64,
    pub skipped_no_legal: u64,
    pub citations_detected: u64,
    pub citations_validated: u64,
    pub hallucinations_found: u64,
    pub contradictions_corrected: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub source_errors: u64,
    pub breaker_blocks: u64,
}

impl Metrics {
    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::TotalQueries => &self.total_queries,
            Counter::SkippedShort => &self.skipped_short,
            Counter::SkippedNoLegal => &self.skipped_no_legal,
            Counter::CitationsDetected => &self.citations_detected,
            Counter::CitationsValidated => &self.citations_validated,
            Counter::HallucinationsFound => &self.hallucinations_found,
            Counter::ContradictionsCorrected => &self.contradictions_corrected,
            Counter::CacheHits => &self.cache_hits,
            Counter::CacheMisses => &self.cache_misses,
            Counter::SourceErrors => &self.source_errors,
            Counter::BreakerBlocks => &self.breaker_blocks,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        if n > 0 {
            self.slot(counter).fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_queries: self.get(Counter::TotalQueries),
            skipped_short: self.get(Counter::SkippedShort),
            skipped_no_legal: self.get(Counter::SkippedNoLegal),
            citations_detected: self.get(Counter::CitationsDetected),
            citations_validated: self.get(Counter::CitationsValidated),
            hallucinations_found: self.get(Counter::HallucinationsFound),
            contradictions_corrected: self.get(Counter::ContradictionsCorrected),
            cache_hits: self.get(Counter::CacheHits),
            cache_misses: self.get(Counter::CacheMisses),
            source_errors: self.get(Counter::SourceErrors),
            breaker_blocks: self.get(Counter::BreakerBlocks),
        }
    }
}
