//! Circuit breaker guarding calls to the authoritative section source.
//!
//! ```text
//!              failures >= threshold          timeout elapsed
//!   ┌────────┐ ─────────────────────► ┌──────┐ ─────────────► ┌───────────┐
//!   │ CLOSED │                        │ OPEN │                │ HALF-OPEN │
//!   └────────┘ ◄───────────────────── └──────┘ ◄───────────── └───────────┘
//!        ▲            (never)             trial call failed         │
//!        └───────────────────────────────────────────────────────────┘
//!                             trial call succeeded
//! ```
//!
//! - `failure_threshold`: consecutive failures before opening (default: 5)
//! - `open_timeout`: how long the circuit stays open (default: 60s)
//!
//! While half-open exactly one trial call is let through; every other caller
//! is rejected until that call reports back, is abandoned, or has been
//! outstanding for a full `open_timeout`.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Source considered down - calls are rejected without I/O
    Open,
    /// Probing - a single trial call is allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Diagnostic view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time since the last recorded failure, if any.
    pub since_last_failure: Option<Duration>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    /// When the breaker last moved to open; the open period runs from here.
    opened_at: Option<Instant>,
    trial: Option<Trial>,
    next_trial_id: u64,
}

#[derive(Clone, Copy)]
struct Trial {
    id: u64,
    started: Instant,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

/// Admission to call the source, handed out by [`CircuitBreaker::try_acquire`].
///
/// Settle it with [`succeed`](Self::succeed) or [`fail`](Self::fail). A permit
/// dropped unsettled (the caller was cancelled) frees the half-open trial slot
/// for the next caller; one dropped while panicking counts as a failure.
#[must_use = "an unsettled permit is treated as an abandoned call"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit holds the half-open trial slot.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if std::thread::panicking() {
            warn!(trial = self.trial.is_some(), "section source call panicked");
            self.breaker.record_failure();
        } else if let Some(id) = self.trial {
            self.breaker.abandon_trial(id);
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                opened_at: None,
                trial: None,
                next_trial_id: 0,
            }),
        }
    }

    /// Gate checked before every external call. Never performs I/O.
    ///
    /// The first call after the open timeout moves the breaker to half-open
    /// and is granted the single trial slot. A caller granted the slot here
    /// must report back through [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure); prefer
    /// [`try_acquire`](Self::try_acquire), which releases it on cancellation.
    pub fn can_proceed(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`can_proceed`](Self::can_proceed), returning a permit that
    /// settles the call.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        self.admit().map(|trial| BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// `None` rejects; `Some(Some(id))` grants the trial slot `id`.
    fn admit(&self) -> Option<Option<u64>> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Some(None),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(self.config.open_timeout);
                if elapsed >= self.config.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_failures = 0;
                    info!("circuit breaker half-open, allowing trial call");
                    Some(Some(inner.start_trial(now)))
                } else {
                    debug!(
                        remaining_ms = (self.config.open_timeout - elapsed).as_millis() as u64,
                        "circuit breaker open, rejecting call"
                    );
                    None
                }
            }
            CircuitState::HalfOpen => match inner.trial.map(|t| t.started) {
                Some(started)
                    if now.saturating_duration_since(started) < self.config.open_timeout =>
                {
                    None
                }
                Some(_) => {
                    warn!("half-open trial never reported back, granting a new trial");
                    Some(Some(inner.start_trial(now)))
                }
                None => Some(Some(inner.start_trial(now))),
            },
        }
    }

    fn abandon_trial(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial.is_some_and(|t| t.id == id) {
            inner.trial = None;
            info!("half-open trial call abandoned, slot released");
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(from = %inner.state, "circuit breaker closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        failures = inner.consecutive_failures,
                        open_secs = self.config.open_timeout.as_secs(),
                        "circuit breaker opened, section source disabled"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial = None;
                warn!("circuit breaker trial call failed, reopening");
            }
            // Late failures from calls admitted before opening do not extend the open period.
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            since_last_failure: inner
                .last_failure
                .map(|t| Instant::now().saturating_duration_since(t)),
        }
    }
}

impl Inner {
    fn start_trial(&mut self, now: Instant) -> u64 {
        let id = self.next_trial_id;
        self.next_trial_id += 1;
        self.trial = Some(Trial { id, started: now });
        id
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
