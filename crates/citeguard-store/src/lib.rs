//! Section cache, circuit breaker, and the guarded lookup adapter that sits
//! between the verification pipeline and an authoritative section source.
//!
//! The DuckDB backend (feature `duckdb`) serves sections straight from a
//! local datastore.

pub mod breaker;
pub mod cache;
mod error;
pub mod lookup;

pub use breaker::{BreakerConfig, BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use cache::{CacheStats, SectionCache};
pub use error::StoreError;
pub use lookup::{
    CitationLookup, FetchReport, LookupOptions, LookupOutcome, SectionLookup, Unavailable,
};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckSectionSource;
