//! Request dispatch to backend services.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → Gateway (service lookup)
//!     → ServiceProxy::dispatch
//!         → LoadBalancer::select (eligibility + strategy)
//!         → Forwarder (upstream call under the instance deadline)
//!         → circuit breaker feedback, retry decision
//! ```

pub mod dispatcher;
pub mod forward;
pub mod gateway;
pub mod service;

pub use forward::{ForwardError, Forwarder, HttpForwarder};
pub use gateway::{Gateway, GatewayHealth};
pub use service::{HealthStatus, ServiceHealth, ServiceProxy, ServiceStats};
