//! Circuit breaking for key lookups.
//!
//! When the database is down, every SSH connection attempt would otherwise pay
//! the full connect timeout. After `failure_threshold` consecutive
//! infrastructure failures the breaker opens and lookups are refused without
//! touching the database. Once `reset_timeout` elapses a single trial lookup is
//! let through; its outcome closes or re-opens the circuit.
//!
//! ```text
//! Closed --(threshold failures)--> Open --(reset timeout)--> HalfOpen
//!   ^                                ^                          |
//!   +----------(trial succeeds)------+---(trial fails)----------+
//! ```
//!
//! A trial that ends without a verdict (rejected input, an oversized query, a
//! panic) hands its slot back through [`CircuitBreaker::release`]. A trial that
//! never reports back at all expires after another reset timeout.

use std::time::{Duration, Instant};

/// Circuit breaker settings for a key backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageResilienceConfig {
    /// Consecutive failed lookups before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before a trial lookup.
    pub breaker_reset_timeout_ms: u64,
    /// Trial lookups admitted while half-open.
    pub breaker_half_open_max_calls: u32,
}

impl Default for StorageResilienceConfig {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
        }
    }
}

impl StorageResilienceConfig {
    /// Applies `DBKEYS_BREAKER_*` overrides read through `lookup`.
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = parsed("DBKEYS_BREAKER_FAILURE_THRESHOLD") {
            self.breaker_failure_threshold = clamp_count(v);
        }
        if let Some(v) = parsed("DBKEYS_BREAKER_RESET_MS") {
            self.breaker_reset_timeout_ms = v;
        }
        if let Some(v) = parsed("DBKEYS_BREAKER_HALF_OPEN_MAX_CALLS") {
            self.breaker_half_open_max_calls = clamp_count(v);
        }
        self
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout in milliseconds.
    #[must_use]
    pub const fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.breaker_reset_timeout_ms = timeout_ms;
        self
    }

    /// Sets how many trial lookups run while half-open.
    #[must_use]
    pub const fn with_half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.breaker_half_open_max_calls = max_calls;
        self
    }
}

fn clamp_count(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX).max(1)
}

#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { trials: u32, since: Instant },
}

impl BreakerState {
    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed { .. } => 0.0,
            Self::Open { .. } => 1.0,
            Self::HalfOpen { .. } => 2.0,
        }
    }
}

/// Circuit breaker guarding one backend.
///
/// Every transition is published as the `dbkeys_breaker_state{backend}`
/// gauge: 0 closed, 1 open, 2 half-open.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    backend_name: &'static str,
}

impl CircuitBreaker {
    /// Creates a closed breaker. Thresholds below one are raised to one.
    #[must_use]
    pub fn new(config: &StorageResilienceConfig, backend_name: &'static str) -> Self {
        let breaker = Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
            backend_name,
        };
        breaker.publish();
        breaker
    }

    /// Decides whether a lookup may reach the database.
    ///
    /// The call that moves the circuit to half-open is itself the first
    /// trial.
    pub fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { since } if since.elapsed() >= self.reset_timeout => {
                tracing::info!(backend = self.backend_name, "Circuit breaker half-open, admitting trial");
                self.transition(BreakerState::HalfOpen {
                    trials: 1,
                    since: Instant::now(),
                });
                true
            },
            BreakerState::Open { .. } => false,
            BreakerState::HalfOpen { since, .. } if since.elapsed() >= self.reset_timeout => {
                tracing::warn!(
                    backend = self.backend_name,
                    "Half-open trial never reported back, admitting a new one"
                );
                self.transition(BreakerState::HalfOpen {
                    trials: 1,
                    since: Instant::now(),
                });
                true
            },
            BreakerState::HalfOpen { trials, since } => {
                if trials >= self.half_open_max_calls {
                    return false;
                }
                self.state = BreakerState::HalfOpen {
                    trials: trials + 1,
                    since,
                };
                true
            },
        }
    }

    /// Records a successful lookup, closing the circuit.
    pub fn on_success(&mut self) {
        match self.state {
            BreakerState::Closed { failures: 0 } => {},
            BreakerState::Closed { .. } => self.state = BreakerState::Closed { failures: 0 },
            BreakerState::Open { .. } | BreakerState::HalfOpen { .. } => {
                tracing::info!(backend = self.backend_name, "Circuit breaker closed after successful trial");
                self.transition(BreakerState::Closed { failures: 0 });
            },
        }
    }

    /// Records a failed lookup. Returns `true` if the circuit just opened.
    pub fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { failures } if failures + 1 < self.failure_threshold => {
                self.state = BreakerState::Closed {
                    failures: failures + 1,
                };
                false
            },
            BreakerState::Closed { failures } => {
                tracing::warn!(
                    backend = self.backend_name,
                    failures = failures + 1,
                    threshold = self.failure_threshold,
                    "Circuit breaker opened after consecutive failures"
                );
                self.transition(BreakerState::Open {
                    since: Instant::now(),
                });
                true
            },
            BreakerState::HalfOpen { .. } => {
                tracing::warn!(backend = self.backend_name, "Trial lookup failed, circuit re-opened");
                self.transition(BreakerState::Open {
                    since: Instant::now(),
                });
                true
            },
            BreakerState::Open { .. } => false,
        }
    }

    /// Hands back an admitted lookup that produced no verdict on the
    /// database. Closed and open circuits are unaffected; a half-open circuit
    /// frees the trial slot.
    pub fn release(&mut self) {
        if let BreakerState::HalfOpen { trials, since } = self.state {
            self.state = BreakerState::HalfOpen {
                trials: trials.saturating_sub(1),
                since,
            };
        }
    }

    /// Returns the current state: 0 closed, 1 open, 2 half-open.
    #[must_use]
    pub const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }

    /// Returns the backend name.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    fn transition(&mut self, state: BreakerState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        metrics::gauge!("dbkeys_breaker_state", "backend" => self.backend_name)
            .set(self.state.gauge_value());
    }
}
