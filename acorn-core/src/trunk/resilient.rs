use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use super::{Trunk, TrunkCapabilities};
use crate::error::{AcornError, AcornResult};
use crate::nut::Nut;

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive transient failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before a half-open probe.
    pub open_timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Breaker {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Retries classified transient failures with exponential backoff and
/// jitter, optionally falls back to a second trunk, and trips a circuit
/// breaker after repeated failures.
pub struct ResilientTrunk<T> {
    inner: Arc<dyn Trunk<T>>,
    fallback: Option<Arc<dyn Trunk<T>>>,
    options: RetryOptions,
    breaker: Mutex<Breaker>,
}

impl<T> ResilientTrunk<T> {
    pub fn new(inner: Arc<dyn Trunk<T>>, options: RetryOptions) -> Self {
        ResilientTrunk {
            inner,
            fallback: None,
            options,
            breaker: Mutex::new(Breaker::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn with_fallback(
        inner: Arc<dyn Trunk<T>>,
        fallback: Arc<dyn Trunk<T>>,
        options: RetryOptions,
    ) -> Self {
        let mut trunk = ResilientTrunk::new(inner, options);
        trunk.fallback = Some(fallback);
        trunk
    }

    pub fn breaker_state(&self) -> BreakerState {
        match *self.breaker.lock() {
            Breaker::Closed { .. } => BreakerState::Closed,
            Breaker::Open { .. } => BreakerState::Open,
            Breaker::HalfOpen => BreakerState::HalfOpen,
        }
    }

    /// Checks the breaker before an attempt. Returns whether calls may
    /// proceed; flips open breakers to half-open once the timeout passes.
    fn admit(&self) -> bool {
        let mut breaker = self.breaker.lock();
        match *breaker {
            Breaker::Closed { .. } | Breaker::HalfOpen => true,
            Breaker::Open { since } => {
                if since.elapsed() >= self.options.open_timeout {
                    *breaker = Breaker::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        *self.breaker.lock() = Breaker::Closed {
            consecutive_failures: 0,
        };
    }

    fn record_failure(&self) {
        let mut breaker = self.breaker.lock();
        *breaker = match *breaker {
            Breaker::Closed { consecutive_failures } => {
                let failures = consecutive_failures + 1;
                if failures >= self.options.failure_threshold {
                    warn!(failures, "circuit breaker opening");
                    Breaker::Open {
                        since: Instant::now(),
                    }
                } else {
                    Breaker::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            // A failed half-open probe re-opens immediately.
            Breaker::HalfOpen | Breaker::Open { .. } => Breaker::Open {
                since: Instant::now(),
            },
        };
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .options
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.options.max_delay);
        let jitter_cap = (exp.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        exp + Duration::from_millis(jitter)
    }

    fn call<R>(&self, op: impl Fn(&dyn Trunk<T>) -> AcornResult<R>) -> AcornResult<R> {
        if !self.admit() {
            if let Some(fallback) = &self.fallback {
                debug!("circuit open, serving from fallback trunk");
                return op(fallback.as_ref());
            }
            return Err(AcornError::CircuitOpen);
        }

        let mut attempt = 0u32;
        loop {
            match op(self.inner.as_ref()) {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.options.max_retries => {
                    debug!(attempt, %err, "transient failure, backing off");
                    std::thread::sleep(self.backoff_delay(attempt));
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    self.record_failure();
                    if let Some(fallback) = &self.fallback {
                        warn!(%err, "retries exhausted, serving from fallback trunk");
                        return op(fallback.as_ref());
                    }
                    return Err(err);
                }
                // Non-transient errors pass through untouched and do not
                // count against the breaker.
                Err(err) => return Err(err),
            }
        }
    }
}

impl<T> Trunk<T> for ResilientTrunk<T>
where
    T: Clone + Send + Sync,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        self.call(|trunk| trunk.stash(id, nut))
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        self.call(|trunk| trunk.crack(id))
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        self.call(|trunk| trunk.toss(id))
    }

    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        self.call(|trunk| trunk.crack_all())
    }

    fn get_history(&self, id: &str) -> AcornResult<Vec<Nut<T>>> {
        self.inner.get_history(id)
    }

    fn flush(&self) -> AcornResult<()> {
        self.call(|trunk| trunk.flush())
    }

    fn capabilities(&self) -> TrunkCapabilities {
        TrunkCapabilities {
            trunk_type: "resilient",
            ..self.inner.capabilities()
        }
    }

    fn dispose(&self) {
        self.inner.dispose();
        if let Some(fallback) = &self.fallback {
            fallback.dispose();
        }
    }
}
