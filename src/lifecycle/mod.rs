//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Broadcast → HTTP server stops accepting → drain in-flight requests
//!     → health checkers stopped → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
