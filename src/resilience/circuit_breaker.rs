//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: instance assumed down, requests fail fast
//! - Half-Open: testing if instance recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: after recovery timeout (first admitted request, or a passing probe)
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails
//! ```
//!
//! # Design Decisions
//! - Per-instance circuit breaker (not global)
//! - Pure state machine: callers pass `now` and hold the instance lock
//! - Single trial in Half-Open; the first request to be admitted owns it,
//!   everyone else sees the instance as Open until the trial resolves
//! - Health probes never count as failures; they only reset or re-admit

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds shared by every breaker of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    pub max_failures: u32,
    pub failure_window: Duration,
    pub recovery_timeout: Duration,
    pub count_server_errors: bool,
}

impl From<&CircuitBreakerConfig> for CircuitPolicy {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            max_failures: config.max_failures.max(1),
            failure_window: Duration::from_millis(config.circuit_timeout_ms),
            recovery_timeout: Duration::from_millis(config.recovery_timeout_ms),
            count_server_errors: config.count_server_errors,
        }
    }
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

/// Result of asking the breaker to let a request through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed circuit, ordinary request.
    Normal,
    /// The single Half-Open trial.
    Trial,
    Rejected,
}

/// A state change worth logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: CircuitPolicy,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(policy: CircuitPolicy) -> Self {
        Self {
            policy,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    pub fn policy(&self) -> &CircuitPolicy {
        &self.policy
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    pub fn trial_in_flight(&self) -> bool {
        self.trial_in_flight
    }

    fn recovery_elapsed(&self, now: Instant) -> bool {
        self.opened_at
            .map(|opened| now.saturating_duration_since(opened) >= self.policy.recovery_timeout)
            .unwrap_or(true)
    }

    /// Whether a request arriving at `now` could be admitted. Does not mutate.
    pub fn can_admit(&self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.recovery_elapsed(now),
            CircuitState::HalfOpen => !self.trial_in_flight,
        }
    }

    /// Admit a request, claiming the Half-Open trial if that is what it takes.
    pub fn try_admit(&mut self, now: Instant) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (Admission::Normal, None),
            CircuitState::Open if self.recovery_elapsed(now) => {
                let transition = self.transition(CircuitState::HalfOpen);
                self.trial_in_flight = true;
                (Admission::Trial, transition)
            }
            CircuitState::Open => (Admission::Rejected, None),
            CircuitState::HalfOpen if !self.trial_in_flight => {
                self.trial_in_flight = true;
                (Admission::Trial, None)
            }
            CircuitState::HalfOpen => (Admission::Rejected, None),
        }
    }

    /// Record a non-failure outcome of a request-path attempt.
    pub fn on_success(&mut self, admission: Admission) -> Option<Transition> {
        match (self.state, admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                self.trial_in_flight = false;
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.transition(CircuitState::Closed)
            }
            (CircuitState::Closed, _) => {
                self.consecutive_failures = 0;
                None
            }
            // Straggler admitted before the circuit opened.
            _ => None,
        }
    }

    /// Record a failed request-path attempt.
    pub fn on_failure(&mut self, now: Instant, admission: Admission) -> Option<Transition> {
        let stale = self
            .last_failure
            .map(|last| now.saturating_duration_since(last) > self.policy.failure_window)
            .unwrap_or(false);
        self.last_failure = Some(now);

        match (self.state, admission) {
            (CircuitState::Closed, _) => {
                if stale {
                    self.consecutive_failures = 0;
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.policy.max_failures {
                    self.opened_at = Some(now);
                    return self.transition(CircuitState::Open);
                }
                None
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                self.trial_in_flight = false;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.opened_at = Some(now);
                self.transition(CircuitState::Open)
            }
            _ => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                None
            }
        }
    }

    /// The trial was dropped without an outcome (cancelled request).
    pub fn on_abandoned(&mut self, admission: Admission) {
        if admission == Admission::Trial && self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    /// A health probe passed.
    pub fn on_probe_success(&mut self, now: Instant) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::Open if self.recovery_elapsed(now) => {
                self.transition(CircuitState::HalfOpen)
            }
            _ => None,
        }
    }

    fn transition(&mut self, to: CircuitState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(Transition { from, to })
    }
}
