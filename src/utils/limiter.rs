//! Per-source rate limiting.
//!
//! Every source gets one [`SourceLimiter`], shared across all
//! identifiers currently in flight for that source. It combines a
//! minimum inter-request interval (a governor quota) with a cap on
//! parallel in-flight requests (a semaphore). Limiters are injected
//! into the registry rather than read from global state so tests can
//! substitute unlimited ones.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Interval plus in-flight concurrency limit for one source.
#[derive(Debug)]
pub struct SourceLimiter {
    quota: Option<DirectLimiter>,
    in_flight: Semaphore,
}

/// Held for the duration of one request against a source.
pub struct LimiterPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl SourceLimiter {
    /// Build a limiter enforcing at most one request per `interval`
    /// and at most `max_in_flight` parallel requests.
    pub fn new(interval: Duration, max_in_flight: usize) -> Self {
        let quota = if interval.is_zero() {
            None
        } else {
            Quota::with_period(interval).map(|q| {
                RateLimiter::direct(q.allow_burst(nonzero!(1u32)))
            })
        };
        Self {
            quota,
            in_flight: Semaphore::new(max_in_flight.max(1)),
        }
    }

    /// A limiter that never waits, for tests and mock chains.
    pub fn unlimited() -> Self {
        Self {
            quota: None,
            in_flight: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }

    /// Wait until this source may be contacted again, then take an
    /// in-flight slot. The returned permit must be held across the
    /// whole request.
    pub async fn acquire(&self) -> LimiterPermit<'_> {
        // Semaphore is never closed, so acquire cannot fail.
        let permit = self
            .in_flight
            .acquire()
            .await
            .unwrap_or_else(|_| unreachable!("limiter semaphore closed"));
        if let Some(quota) = &self.quota {
            quota.until_ready().await;
        }
        LimiterPermit { _permit: permit }
    }

    /// Number of currently available in-flight slots.
    pub fn available(&self) -> usize {
        self.in_flight.available_permits()
    }
}
