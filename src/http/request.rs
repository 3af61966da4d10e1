//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4)
//! - Split the service name off the request path
//! - Prepare requests for forwarding to an instance
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Original request parts kept; a fresh copy is built for every attempt

use axum::http::{
    header::{self, HeaderName},
    uri::PathAndQuery,
    HeaderMap, HeaderValue, Request, Uri,
};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::Url;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a UUID v4 request ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Request ID of an incoming request, if the layer (or the client) set one.
pub fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
}

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// Remove connection-scoped headers that must not be forwarded.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Split `/{service}/rest?query` into the service name and `/rest?query`.
pub fn split_service_path(uri: &Uri) -> Option<(String, PathAndQuery)> {
    let path = uri.path().strip_prefix('/')?;
    let (service, rest) = match path.find('/') {
        Some(idx) => (&path[..idx], &path[idx..]),
        None => (path, "/"),
    };
    if service.is_empty() {
        return None;
    }

    let forwarded = match uri.query() {
        Some(q) => format!("{}?{}", rest, q),
        None => rest.to_string(),
    };
    let forwarded = PathAndQuery::try_from(forwarded).ok()?;
    Some((service.to_string(), forwarded))
}

/// Target URI on an instance: its base URL path followed by the request path.
pub fn upstream_uri(base: &Url, path_and_query: Option<&PathAndQuery>) -> Result<Uri, axum::http::Error> {
    let origin = base.origin().ascii_serialization();
    let base_path = base.path().trim_end_matches('/');
    let tail = path_and_query.map(|p| p.as_str()).unwrap_or("/");
    let uri = Uri::try_from(format!("{}{}{}", origin, base_path, tail))?;
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_service_path() {
        let uri: Uri = "/user-svc/users/42?full=true".parse().unwrap();
        let (service, rest) = split_service_path(&uri).unwrap();
        assert_eq!(service, "user-svc");
        assert_eq!(rest.as_str(), "/users/42?full=true");

        let uri: Uri = "/chat-svc".parse().unwrap();
        let (service, rest) = split_service_path(&uri).unwrap();
        assert_eq!(service, "chat-svc");
        assert_eq!(rest.as_str(), "/");

        let uri: Uri = "/".parse().unwrap();
        assert!(split_service_path(&uri).is_none());
    }

    #[test]
    fn test_upstream_uri() {
        let base = Url::parse("http://10.0.0.5:3000/api/").unwrap();
        let pq = PathAndQuery::from_static("/users?id=1");
        let uri = upstream_uri(&base, Some(&pq)).unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.5:3000/api/users?id=1");

        let base = Url::parse("http://127.0.0.1:8080").unwrap();
        let uri = upstream_uri(&base, None).unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_make_request_id() {
        let req = Request::builder().body(()).unwrap();
        let id = MakeRequestUuid.make_request_id(&req).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(value).is_ok());
    }
}
