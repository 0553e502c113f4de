use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use cryptodesk_models::config::BreakerConfig;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of a call the breaker refused or passed through.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Refused without calling the dependency.
    Open(String),
    Inner(E),
}

#[derive(Debug)]
enum Inner {
    Closed {
        failures: u32,
        first_failure: Option<Instant>,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        probing: bool,
    },
}

/// Per-dependency circuit breaker.
///
/// `failure_threshold` consecutive failures inside `window` open the circuit.
/// While open, calls fail immediately. After `cooldown` exactly one probe is
/// admitted; its success closes the circuit and its failure reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    failure_threshold: u32,
    window: Duration,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        dependency: impl Into<String>,
        failure_threshold: u32,
        window: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            failure_threshold: failure_threshold.max(1),
            window,
            cooldown,
            inner: Mutex::new(Inner::Closed {
                failures: 0,
                first_failure: None,
            }),
        }
    }

    pub fn from_config(dependency: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(
            dependency,
            config.failure_threshold,
            Duration::from_secs(config.window_seconds),
            Duration::from_secs(config.cooldown_seconds),
        )
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn state(&self) -> CircuitState {
        match &*self.lock() {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { until } if Instant::now() < *until => CircuitState::Open,
            Inner::Open { .. } | Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// Errors for which `is_failure` returns false pass through without
    /// counting against the dependency (a rejected order is a healthy answer).
    pub async fn call<F, Fut, T, E, P>(&self, is_failure: P, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let probe = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: probe,
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Err(e) if is_failure(e) => self.record_failure(probe),
            Ok(_) | Err(_) => self.record_success(probe),
        }
        result.map_err(BreakerError::Inner)
    }

    /// Admit a call. Returns true when the call is the half-open probe.
    fn admit<E>(&self) -> Result<bool, BreakerError<E>> {
        let mut inner = self.lock();
        match &*inner {
            Inner::Closed { .. } => Ok(false),
            Inner::Open { until } if Instant::now() < *until => {
                Err(BreakerError::Open(self.dependency.clone()))
            }
            Inner::Open { .. } | Inner::HalfOpen { probing: false } => {
                info!(dependency = %self.dependency, "Circuit half-open, admitting probe");
                *inner = Inner::HalfOpen { probing: true };
                Ok(true)
            }
            Inner::HalfOpen { probing: true } => Err(BreakerError::Open(self.dependency.clone())),
        }
    }

    /// Only the admitted probe may close an open circuit. A straggler admitted
    /// before the circuit opened says nothing about recovery.
    fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        match &*inner {
            Inner::Closed { .. } => {}
            Inner::HalfOpen { .. } | Inner::Open { .. } if probe => {
                info!(dependency = %self.dependency, "Circuit closed");
            }
            Inner::HalfOpen { .. } | Inner::Open { .. } => return,
        }
        *inner = Inner::Closed {
            failures: 0,
            first_failure: None,
        };
    }

    fn record_failure(&self, probe: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        let next = match &*inner {
            Inner::Closed {
                failures,
                first_failure,
            } => {
                let (failures, first) = match first_failure {
                    Some(first) if now.duration_since(*first) <= self.window => (failures + 1, *first),
                    _ => (1, now),
                };
                if failures >= self.failure_threshold {
                    warn!(
                        dependency = %self.dependency,
                        failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit opened"
                    );
                    Inner::Open {
                        until: now + self.cooldown,
                    }
                } else {
                    Inner::Closed {
                        failures,
                        first_failure: Some(first),
                    }
                }
            }
            Inner::HalfOpen { .. } | Inner::Open { .. } if !probe => return,
            Inner::HalfOpen { .. } | Inner::Open { .. } => {
                warn!(dependency = %self.dependency, "Probe failed, circuit reopened");
                Inner::Open {
                    until: now + self.cooldown,
                }
            }
        };
        *inner = next;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Frees the half-open slot if the probe is dropped before it reports.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.lock();
            if matches!(*inner, Inner::HalfOpen { probing: true }) {
                *inner = Inner::HalfOpen { probing: false };
            }
        }
    }
}
