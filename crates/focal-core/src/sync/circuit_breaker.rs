//! Per-dependency circuit breaker
//!
//! Stops hammering a consistently-failing remote: after `failure_threshold`
//! failures the breaker opens and refuses calls until `reset_timeout`
//! elapses, then allows a half-open trial window before re-deciding.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Breaker tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive-weighted failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before a half-open trial
    pub reset_timeout: Duration,
    /// Trial calls allowed while half-open
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

/// Breaker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure_at: Option<Instant>,
    half_open_calls: u32,
}

/// Circuit breaker wrapping calls to one named dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker for the named dependency, starting closed
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_at: None,
                half_open_calls: 0,
            }),
        }
    }

    /// Dependency name this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the breaker currently refuses calls.
    ///
    /// Lazily transitions Open -> `HalfOpen` once `reset_timeout` has elapsed
    /// since the last failure.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure_at
                .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
            if elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_calls = 0;
                tracing::info!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
            }
        }
        inner.state == CircuitState::Open
    }

    /// Current state (after any lazy open -> half-open transition)
    pub fn state(&self) -> CircuitState {
        let _ = self.is_open();
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Failure count currently recorded
    pub fn failures(&self) -> u32 {
        self.inner.lock().expect("breaker lock poisoned").failures
    }

    /// Run `f` unless the breaker is open.
    ///
    /// Refuses immediately with `Error::CircuitOpen` without invoking `f`
    /// when open or when the half-open trial window is exhausted.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.is_open() {
            return Err(Error::CircuitOpen(self.name.clone()));
        }

        {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            if inner.state == CircuitState::HalfOpen {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    return Err(Error::CircuitOpen(self.name.clone()));
                }
                inner.half_open_calls += 1;
            }
        }

        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.last_failure_at = None;
            tracing::info!(breaker = %self.name, "Circuit breaker closed after successful trial");
        } else {
            // A success pays down one failure rather than wiping the slate,
            // so a flapping dependency still trips the breaker
            inner.failures = inner.failures.saturating_sub(1);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failures += 1;
        inner.last_failure_at = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            // Trial failed: back to open, timer restarts
            inner.state = CircuitState::Open;
            tracing::warn!(breaker = %self.name, "Half-open trial failed, circuit breaker open again");
        } else if inner.failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            tracing::warn!(
                breaker = %self.name,
                failures = inner.failures,
                "Failure threshold reached, circuit breaker open"
            );
        }
    }
}

/// Registry handing out one breaker per named dependency
/// ("remote-db", "nas", "sync", ...)
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the breaker for `name`, creating it with `config` on first use
    pub fn get_or_create(&self, name: &str, config: &BreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry lock poisoned");
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config.clone()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .execute(|| async { Err::<(), _>(Error::Remote("boom".to_string())) })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_refuses_calls() {
        let breaker = CircuitBreaker::new("remote-db", test_config());
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert!(breaker.is_open());

        // Wrapped function must not run while open
        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_resets_to_closed() {
        let breaker = CircuitBreaker::new("remote-db", test_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.execute(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_and_restarts_timer() {
        let breaker = CircuitBreaker::new("remote-db", test_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open());

        // Timer restarted: a partial wait is not enough
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(breaker.is_open());
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn success_decrements_failure_count_when_closed() {
        let breaker = CircuitBreaker::new("remote-db", test_config());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.failures(), 2);

        breaker.execute(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.failures(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_returns_same_breaker_per_name() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create("remote-db", &test_config());
        let b = registry.get_or_create("remote-db", &test_config());
        let c = registry.get_or_create("nas", &test_config());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
