//! Timer service: logical clock plus wake-ups at absolute deadlines.
//!
//! Deadlines are wall-clock instants so a timer armed before a restart
//! fires at the same moment after it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{Error, Result};
use crate::types::Seq;

/// Source of time for durable executions.
#[async_trait]
pub trait TimerService: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `deadline` has passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// Timer service on the tokio clock.
///
/// `now()` advances with `tokio::time`, so paused test runtimes observe
/// virtual time consistently in both timestamps and sleeps.
#[derive(Debug, Clone)]
pub struct TokioTimerService {
    origin_wall: DateTime<Utc>,
    origin_instant: tokio::time::Instant,
}

impl TokioTimerService {
    /// Create a timer service anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Create a timer service whose clock reads `origin` right now.
    pub fn anchored_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin_wall: origin,
            origin_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimerService for TokioTimerService {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.origin_instant.elapsed();
        TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|delta| self.origin_wall.checked_add_signed(delta))
            .unwrap_or(self.origin_wall)
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = deadline
            .signed_duration_since(self.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }
}

/// An armed timer inside a durable context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub(crate) seq: Seq,
    pub fire_at: DateTime<Utc>,
}

impl TimerHandle {
    /// Sequence number of the operation that armed this timer.
    pub const fn seq(&self) -> Seq {
        self.seq
    }
}

/// `now + duration`, rejecting overflow.
///
/// # Errors
///
/// Returns `InvalidDuration` if the deadline is not representable.
pub fn deadline_after(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| Error::InvalidDuration {
            reason: format!("{duration:?} after {now} is out of range"),
        })
}
