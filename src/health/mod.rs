//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer (one task per service)
//!     → Probe each instance's health URL
//!     → Set the instance's healthy flag
//!
//! Request-path outcomes (dispatcher):
//!     → Increment / reset consecutive failures
//!     → Circuit breaker transitions
//! ```
//!
//! # Design Decisions
//! - Probes gate eligibility; only request failures trip the breaker
//! - A passing probe re-admits an Open instance once its recovery timeout elapsed
//! - Health state is per-instance, not per-pool

pub mod active;

pub use active::HealthChecker;
