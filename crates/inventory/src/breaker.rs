//! Circuit breaker guarding an external operation.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failure threshold exceeded; calls fail fast until the reset timeout.
    Open,
    /// Reset timeout elapsed; one probe call decides open vs. closed.
    HalfOpen,
}

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Per-operation wall-clock limit; a timeout counts as a failure.
    pub timeout: Duration,
    /// How long an open circuit waits before allowing a probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Readable view of the breaker's internal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not attempted.
    #[error("circuit breaker is open")]
    Open,

    /// The operation exceeded the configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation itself failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
}

/// Failure-counting circuit breaker with open/half-open/closed states.
///
/// State is mutated only through `execute`; cross-task access is
/// synchronized by an internal mutex that is never held across an await.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                next_attempt_at: None,
            }),
        }
    }

    /// Runs `op` through the breaker, racing it against the configured
    /// timeout. An open circuit fails immediately with [`BreakerError::Open`]
    /// until the reset timeout has elapsed, at which point one probe call is
    /// let through.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.check_allowed()?;

        match tokio::time::timeout(self.config.timeout, op()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.record_failure();
                Err(BreakerError::Timeout(self.config.timeout))
            }
        }
    }

    /// Returns a snapshot of the observable state.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        CircuitBreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            next_attempt_at: inner.next_attempt_at,
        }
    }

    fn check_allowed<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            let due = inner.next_attempt_at.is_none_or(|t| Utc::now() >= t);
            if !due {
                return Err(BreakerError::Open);
            }
            inner.state = CircuitState::HalfOpen;
            tracing::info!("circuit breaker half-open, allowing probe");
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.next_attempt_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        inner.failure_count += 1;
        inner.last_failure_at = Some(now);
        if inner.failure_count >= self.config.failure_threshold {
            let next = now
                + chrono::Duration::from_std(self.config.reset_timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
            inner.state = CircuitState::Open;
            inner.next_attempt_at = Some(next);
            tracing::warn!(
                failure_count = inner.failure_count,
                next_attempt_at = %next,
                "circuit breaker open"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_millis(50),
            reset_timeout: Duration::from_millis(30),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("down") }).await.map(|_| ())
    }

    #[tokio::test]
    async fn success_passes_through_and_resets_count() {
        let breaker = CircuitBreaker::new(fast_config());

        fail(&breaker).await.unwrap_err();
        let value = breaker
            .execute(|| async { Ok::<_, &'static str>(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test]
    async fn opens_at_failure_threshold() {
        let breaker = CircuitBreaker::new(fast_config());

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failure_count, 3);
        assert!(snap.next_attempt_at.is_some());
        assert!(snap.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_calling_op() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &'static str>(()) }
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_success_closes_circuit() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        tokio::time::sleep(Duration::from_millis(40)).await;

        let result = breaker
            .execute(|| async { Ok::<_, &'static str>(()) })
            .await;

        assert!(result.is_ok());
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        tokio::time::sleep(Duration::from_millis(40)).await;
        fail(&breaker).await.unwrap_err();

        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert!(snap.next_attempt_at.unwrap() > Utc::now() - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(10),
            reset_timeout: Duration::from_secs(30),
        });

        let result = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, &'static str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout(_))));
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
    }
}
