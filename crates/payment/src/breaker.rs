//! Circuit breaker guarding the payment gateway.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; failures are counted over a rolling window.
    Closed,
    /// Calls fail fast without touching the provider.
    Open,
    /// One trial call decides between `Closed` and `Open`.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        write!(f, "{name}")
    }
}

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within `window` that trip the breaker.
    pub failure_threshold: u32,

    /// Rolling window over which failures are counted.
    pub window: Duration,

    /// How long the breaker stays open before allowing a trial call.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Process-wide breaker, shared by every in-flight payment.
///
/// Callers ask for permission with [`try_acquire`](Self::try_acquire) and
/// must settle every permit: report the call's outcome, or hand an
/// unexercised permit back with [`release`](Self::release). A permit that
/// is never settled leaves a half-open breaker waiting on a trial that
/// will never report.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current state, as a caller would observe it (an elapsed cooldown
    /// reads as half-open).
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Open if self.cooldown_elapsed(&inner) => BreakerState::HalfOpen,
            state => state,
        }
    }

    /// Asks for permission to call the provider.
    ///
    /// `false` means fail fast. In half-open, only one caller at a time
    /// gets a permit; everyone else is rejected until the trial reports.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if self.cooldown_elapsed(&inner) {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Returns a permit that was never exercised, without reporting an
    /// outcome.
    ///
    /// For callers that acquired a permit but failed before reaching the
    /// provider. The half-open trial slot opens up again instead of
    /// staying reserved with no call in flight.
    pub fn release(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Reports a successful permitted call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == BreakerState::HalfOpen {
            inner.failures.clear();
            inner.opened_at = None;
            inner.trial_in_flight = false;
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    /// Reports a failed permitted call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        match inner.state {
            BreakerState::Closed => {
                inner.failures.push_back(now);
                if let Some(cutoff) = now.checked_sub(self.config.window) {
                    while let Some(&front) = inner.failures.front() {
                        if front >= cutoff {
                            break;
                        }
                        inner.failures.pop_front();
                    }
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    fn cooldown_elapsed(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.cooldown)
    }

    fn transition(&self, inner: &mut Inner, next: BreakerState) {
        if inner.state == next {
            return;
        }
        if next == BreakerState::Open {
            tracing::warn!(from = %inner.state, "circuit breaker opened");
        } else {
            tracing::info!(from = %inner.state, to = %next, "circuit breaker transition");
        }
        metrics::counter!("breaker_transitions", "to" => next.to_string()).increment(1);
        inner.state = next;
    }
}
