//! Retry logic.
//!
//! # Responsibilities
//! - Classify an attempt outcome as retryable or terminal
//! - Compute the wait before the next attempt (exponential backoff + full jitter)
//! - Ship named presets (default / aggressive / conservative)
//! - Count retries for observability
//!
//! # Design Decisions
//! - 4xx are never retried (client error, another attempt cannot help)
//! - 5xx, connection errors and timeouts are retryable unless disabled
//! - Policy is immutable once built and shared read-only across requests
//! - Independent of any particular instance

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{RetryConfig, RetryOnConfig, RetryProfile};
use crate::resilience::backoff::calculate_backoff;

/// What happened to a single forwarded attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The instance answered with a status the circuit breaker treats as healthy.
    Success(StatusCode),
    /// The instance answered with an error status.
    Upstream(StatusCode),
    /// Connection refused, reset, or otherwise broken.
    Transport(String),
    /// The instance deadline expired.
    Timeout(Duration),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Outcome::Success(s) | Outcome::Upstream(s) => Some(*s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success(s) => write!(f, "success ({})", s.as_u16()),
            Outcome::Upstream(s) => write!(f, "upstream error ({})", s.as_u16()),
            Outcome::Transport(e) => write!(f, "transport error: {}", e),
            Outcome::Timeout(d) => write!(f, "timed out after {:?}", d),
        }
    }
}

/// Maps an outcome to retry / no-retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryClassifier {
    pub server_errors: bool,
    pub transport_errors: bool,
    pub timeouts: bool,
    pub extra_statuses: Vec<u16>,
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::from(&RetryOnConfig::default())
    }
}

impl From<&RetryOnConfig> for RetryClassifier {
    fn from(config: &RetryOnConfig) -> Self {
        Self {
            server_errors: config.server_errors,
            transport_errors: config.transport_errors,
            timeouts: config.timeouts,
            extra_statuses: config.extra_statuses.clone(),
        }
    }
}

impl RetryClassifier {
    pub fn is_retryable(&self, outcome: &Outcome) -> bool {
        match outcome {
            Outcome::Success(status) | Outcome::Upstream(status) => {
                if self.extra_statuses.contains(&status.as_u16()) {
                    return true;
                }
                status.is_server_error() && self.server_errors
            }
            Outcome::Transport(_) => self.transport_errors,
            Outcome::Timeout(_) => self.timeouts,
        }
    }
}

/// Backoff policy plus retryability classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub classifier: RetryClassifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::profile(RetryProfile::Default)
    }
}

impl RetryPolicy {
    /// The fixed parameter tuple behind a named profile.
    pub fn profile(profile: RetryProfile) -> Self {
        let (max_retries, base_ms, max_ms) = match profile {
            RetryProfile::Default => (3, 100, 5_000),
            RetryProfile::Aggressive => (5, 50, 2_000),
            RetryProfile::Conservative => (2, 500, 10_000),
        };
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter: true,
            classifier: RetryClassifier::default(),
        }
    }

    /// Start from the configured profile and apply any individual overrides.
    pub fn from_config(config: &RetryConfig) -> Self {
        let mut policy = Self::profile(config.profile);
        if let Some(max_retries) = config.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(base_ms) = config.base_delay_ms {
            policy.base_delay = Duration::from_millis(base_ms);
        }
        if let Some(max_ms) = config.max_delay_ms {
            policy.max_delay = Duration::from_millis(max_ms);
        }
        if let Some(jitter) = config.jitter {
            policy.jitter = jitter;
        }
        policy.classifier = RetryClassifier::from(&config.retry_on);
        policy
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether attempt number `attempt` (1-based) that ended in `outcome` should be retried.
    pub fn should_retry(&self, attempt: u32, outcome: &Outcome) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        self.classifier.is_retryable(outcome)
    }

    /// How long to wait after attempt number `attempt` before trying again.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay, self.jitter)
    }
}

/// Retry counters for one service.
#[derive(Debug, Default)]
pub struct RetryStats {
    requests: AtomicU64,
    retries: AtomicU64,
    retry_successes: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStatsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub retry_successes: u64,
    pub exhausted: u64,
}

impl RetryStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A request succeeded on some attempt after the first.
    pub fn record_retry_success(&self) {
        self.retry_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// A request gave up with a failure after retrying.
    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RetryStatsSnapshot {
        RetryStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            retry_successes: self.retry_successes.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier() {
        let c = RetryClassifier::default();
        assert!(c.is_retryable(&Outcome::Upstream(StatusCode::BAD_GATEWAY)));
        assert!(c.is_retryable(&Outcome::Upstream(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(c.is_retryable(&Outcome::Transport("connection refused".into())));
        assert!(c.is_retryable(&Outcome::Timeout(Duration::from_secs(1))));
        assert!(!c.is_retryable(&Outcome::Success(StatusCode::NOT_FOUND)));
        assert!(!c.is_retryable(&Outcome::Success(StatusCode::TOO_MANY_REQUESTS)));
        assert!(!c.is_retryable(&Outcome::Success(StatusCode::OK)));

        let c = RetryClassifier {
            server_errors: false,
            extra_statuses: vec![429],
            ..RetryClassifier::default()
        };
        assert!(!c.is_retryable(&Outcome::Upstream(StatusCode::SERVICE_UNAVAILABLE)));
        assert!(c.is_retryable(&Outcome::Success(StatusCode::TOO_MANY_REQUESTS)));
    }

    #[test]
    fn test_should_retry_bound() {
        let policy = RetryPolicy::default().with_max_retries(2);
        let failure = Outcome::Upstream(StatusCode::SERVICE_UNAVAILABLE);

        assert!(policy.should_retry(1, &failure));
        assert!(policy.should_retry(2, &failure));
        assert!(!policy.should_retry(3, &failure));
        assert!(!policy.should_retry(1, &Outcome::Success(StatusCode::BAD_REQUEST)));
    }

    #[test]
    fn test_deterministic_delays_without_jitter() {
        let policy = RetryPolicy::default()
            .with_jitter(false)
            .with_delays(Duration::from_millis(100), Duration::from_millis(300));

        let delays: Vec<_> = (1..=4).map(|a| policy.next_delay(a)).collect();
        assert_eq!(delays, vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(300),
            Duration::from_millis(300),
        ]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_profiles() {
        let default = RetryPolicy::profile(RetryProfile::Default);
        let aggressive = RetryPolicy::profile(RetryProfile::Aggressive);
        let conservative = RetryPolicy::profile(RetryProfile::Conservative);

        assert!(aggressive.max_retries > default.max_retries);
        assert!(aggressive.base_delay < default.base_delay);
        assert!(conservative.max_retries < default.max_retries);
        assert!(conservative.base_delay > default.base_delay);
    }

    #[test]
    fn test_config_overrides_profile() {
        let config = RetryConfig {
            profile: RetryProfile::Conservative,
            max_retries: Some(7),
            jitter: Some(false),
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 7);
        assert!(!policy.jitter);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = RetryStats::default();
        stats.record_request();
        stats.record_retry();
        stats.record_retry();
        stats.record_exhausted();
        assert_eq!(stats.snapshot(), RetryStatsSnapshot {
            requests: 1,
            retries: 2,
            retry_successes: 0,
            exhausted: 1,
        });
    }
}
