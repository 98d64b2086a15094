//! Rate-limited diagnostics for the decision path.
//!
//! Aborted and faulting programs can fire on every scheduling opportunity,
//! so warnings are emitted at most once per interval per kind, carrying the
//! number of occurrences suppressed since the last one. Counters are exact.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

use mpsched_core::ConnectionId;
use mpsched_runtime::Fault;

/// Lets one event through per interval.
///
/// Times are stored as nanos since the limiter's creation so the gate is a
/// single atomic.
pub struct RateLimiter {
    epoch: Instant,
    interval_nanos: u64,
    next_allowed_nanos: AtomicU64,
    suppressed: AtomicU64,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            interval_nanos: u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX),
            next_allowed_nanos: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// `Some(suppressed)` if the caller may emit now.
    pub fn check(&self) -> Option<u64> {
        let now = u64::try_from(Instant::now().duration_since(self.epoch).as_nanos())
            .unwrap_or(u64::MAX);
        self.check_at(now)
    }

    fn check_at(&self, now_nanos: u64) -> Option<u64> {
        let mut next = self.next_allowed_nanos.load(Ordering::Acquire);
        loop {
            if now_nanos < next {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            match self.next_allowed_nanos.compare_exchange_weak(
                next,
                now_nanos.saturating_add(self.interval_nanos),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(self.suppressed.swap(0, Ordering::Relaxed)),
                Err(actual) => next = actual,
            }
        }
    }
}

/// Decision-path diagnostics shared by every connection.
pub struct Diagnostics {
    budget_limiter: RateLimiter,
    fault_limiter: RateLimiter,
    missing_limiter: RateLimiter,
    budget_exceeded_total: AtomicU64,
    faults_total: AtomicU64,
    fallbacks_total: AtomicU64,
}

impl Diagnostics {
    pub fn new(interval: Duration) -> Self {
        Self {
            budget_limiter: RateLimiter::new(interval),
            fault_limiter: RateLimiter::new(interval),
            missing_limiter: RateLimiter::new(interval),
            budget_exceeded_total: AtomicU64::new(0),
            faults_total: AtomicU64::new(0),
            fallbacks_total: AtomicU64::new(0),
        }
    }

    pub(crate) fn budget_exceeded(&self, connection: ConnectionId, program: &str, limit: u64) {
        self.budget_exceeded_total.fetch_add(1, Ordering::Relaxed);
        if let Some(suppressed) = self.budget_limiter.check() {
            warn!(
                %connection,
                %program,
                limit,
                suppressed,
                "evaluation budget exceeded, using fallback heuristic"
            );
        }
    }

    pub(crate) fn fault(&self, connection: ConnectionId, program: &str, fault: &Fault) {
        self.faults_total.fetch_add(1, Ordering::Relaxed);
        if let Some(suppressed) = self.fault_limiter.check() {
            warn!(
                %connection,
                %program,
                error = %fault,
                suppressed,
                "scheduler program faulted, using fallback heuristic"
            );
        }
    }

    pub(crate) fn program_missing(&self, connection: ConnectionId, program: &str) {
        if let Some(suppressed) = self.missing_limiter.check() {
            warn!(
                %connection,
                %program,
                suppressed,
                "bound scheduler is no longer loaded, using fallback heuristic"
            );
        }
    }

    pub(crate) fn fallback_used(&self) {
        self.fallbacks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Evaluations aborted by the step budget.
    pub fn budget_exceeded_total(&self) -> u64 {
        self.budget_exceeded_total.load(Ordering::Relaxed)
    }

    /// Evaluations aborted by any other program fault.
    pub fn faults_total(&self) -> u64 {
        self.faults_total.load(Ordering::Relaxed)
    }

    /// Decisions produced by a built-in heuristic, for any reason.
    pub fn fallbacks_total(&self) -> u64 {
        self.fallbacks_total.load(Ordering::Relaxed)
    }
}
