//! Side-effect dispatcher: per-call timeout plus bounded retry.
//!
//! The dispatcher runs outside the deterministic body. It never decides
//! whether an effect is needed; the durable context does that by checking
//! the journal first.

use std::future::Future;
use std::time::Duration;

use jetstream_core::DispatcherConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of one attempt of an effect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectCall {
    /// Idempotency key, identical across attempts and replays.
    pub key: Uuid,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Error returned by one attempt of an effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectError {
    pub reason: String,
    pub retryable: bool,
}

impl EffectError {
    /// A failure worth retrying.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// A failure that retrying cannot fix.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for EffectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Final failure of an effect after its retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectFailure {
    pub attempts: u32,
    pub reason: String,
}

impl std::fmt::Display for EffectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.reason)
    }
}

/// Successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs effect calls under the configured timeout and retry policy.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher with the given policy.
    pub const fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// The policy in use.
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Invoke `op` until it succeeds, fails permanently, or the attempt
    /// budget is spent. Each attempt is bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an [`EffectFailure`] carrying the last error.
    pub async fn dispatch<T, F, Fut>(
        &self,
        name: &str,
        key: Uuid,
        mut op: F,
    ) -> Result<Dispatched<T>, EffectFailure>
    where
        F: FnMut(EffectCall) -> Fut,
        Fut: Future<Output = Result<T, EffectError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = self.config.timeout();
        let mut attempt = 1u32;

        loop {
            debug!(effect = name, %key, attempt, max_attempts, "Dispatching effect");

            let result = tokio::time::timeout(timeout, op(EffectCall { key, attempt })).await;

            let error = match result {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        info!(effect = name, %key, attempt, "Effect succeeded after retry");
                    }
                    return Ok(Dispatched {
                        value,
                        attempts: attempt,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => EffectError::transient(format!(
                    "timed out after {}",
                    format_duration(timeout)
                )),
            };

            if !error.retryable || attempt >= max_attempts {
                warn!(
                    effect = name,
                    %key,
                    attempts = attempt,
                    error = %error,
                    "Effect failed; giving up"
                );
                return Err(EffectFailure {
                    attempts: attempt,
                    reason: error.reason,
                });
            }

            warn!(effect = name, %key, attempt, error = %error, "Effect attempt failed");
            tokio::time::sleep(self.config.backoff(attempt)).await;
            attempt = attempt.saturating_add(1);
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
