//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt against an instance:
//!     → deadline = instance timeout (tokio::time::timeout in the dispatcher)
//!     → outcome recorded into the instance's circuit_breaker.rs
//!     → On failure: retries.rs (is it retryable? how long to wait? backoff.rs)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every outbound call has a deadline
//! - Circuit breaker prevents cascading failures
//! - Retry policy knows nothing about instances; it only classifies outcomes

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitPolicy, CircuitState, Transition};
pub use retries::{Outcome, RetryClassifier, RetryPolicy, RetryStats, RetryStatsSnapshot};
