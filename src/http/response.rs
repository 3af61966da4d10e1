//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map gateway failures to HTTP status codes and a structured JSON body
//! - Annotate every response with the service, instance and attempt count
//! - Strip hop-by-hop headers from upstream responses

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::request::strip_hop_by_hop;

/// Logical service that handled the request.
pub const X_PROXY_SERVICE: &str = "x-proxy-service";
/// Instance that produced the final response.
pub const X_PROXY_INSTANCE: &str = "x-proxy-instance";
/// Total forwarded attempts, 1-based.
pub const X_PROXY_ATTEMPTS: &str = "x-proxy-attempts";

/// Failures the gateway answers itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    #[error("service '{0}' is not configured")]
    UnknownService(String),

    #[error("no instances available for service '{0}'")]
    NoInstancesAvailable(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("request body exceeds {0} bytes or could not be read")]
    BodyTooLarge(usize),
}

/// JSON body of every gateway-generated error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub message: String,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UnknownService(_) => StatusCode::NOT_FOUND,
            ProxyError::NoInstancesAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn error(&self) -> &'static str {
        match self {
            ProxyError::UnknownService(_) => "SERVICE_NOT_FOUND",
            ProxyError::NoInstancesAvailable(_) => "SERVICE_UNAVAILABLE",
            ProxyError::Upstream(_) => "BAD_GATEWAY",
            ProxyError::BodyTooLarge(_) => "PAYLOAD_TOO_LARGE",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::UnknownService(_) => "UNKNOWN_SERVICE",
            ProxyError::NoInstancesAvailable(_) => "NO_INSTANCES_AVAILABLE",
            ProxyError::Upstream(_) => "SERVICE_ERROR",
            ProxyError::BodyTooLarge(_) => "BODY_TOO_LARGE",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.error().to_string(),
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Add the `X-Proxy-*` headers.
pub fn annotate(headers: &mut HeaderMap, service: &str, instance: Option<&str>, attempts: u32) {
    if let Ok(value) = HeaderValue::from_str(service) {
        headers.insert(X_PROXY_SERVICE, value);
    }
    if let Some(instance) = instance {
        if let Ok(value) = HeaderValue::from_str(instance) {
            headers.insert(X_PROXY_INSTANCE, value);
        }
    }
    headers.insert(X_PROXY_ATTEMPTS, HeaderValue::from(attempts));
}

/// Gateway-generated error response with the proxy headers attached.
pub fn error_response(
    error: ProxyError,
    service: &str,
    instance: Option<&str>,
    attempts: u32,
) -> Response<Body> {
    let mut response = error.into_response();
    annotate(response.headers_mut(), service, instance, attempts);
    response
}

/// Prepare an upstream response for the client.
pub fn upstream_response(
    mut response: Response<Body>,
    service: &str,
    instance: &str,
    attempts: u32,
) -> Response<Body> {
    strip_hop_by_hop(response.headers_mut());
    annotate(response.headers_mut(), service, Some(instance), attempts);
    response
}
