//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, admin routes)
//!     → request.rs (request ID, service path split, upstream URI)
//!     → [proxy dispatches to an instance]
//!     → response.rs (error mapping, proxy headers)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::{ErrorBody, ProxyError, X_PROXY_ATTEMPTS, X_PROXY_INSTANCE, X_PROXY_SERVICE};
pub use server::HttpServer;
