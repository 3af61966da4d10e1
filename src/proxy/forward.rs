//! Upstream transport.
//!
//! The dispatcher only needs "send this request, give me a response or an
//! error". [`Forwarder`] is that seam; [`HttpForwarder`] is the pooled
//! hyper client used in production, tests substitute scripted forwarders.

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("{0}")]
    Transport(String),
}

pub trait Forwarder: Send + Sync {
    fn forward(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, ForwardError>>;
}

/// Pooled HTTP/1.1 client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
}

impl HttpForwarder {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(Duration::from_secs(5)));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(connector);

        Self { client }
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl Forwarder for HttpForwarder {
    fn forward(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, ForwardError>> {
        let pending = self.client.request(request);
        Box::pin(async move {
            match pending.await {
                Ok(response) => Ok(response.map(|body: hyper::body::Incoming| Body::new(body))),
                Err(e) => {
                    // The legacy client error hides the cause one level down.
                    let message = match e.source() {
                        Some(cause) => format!("{}: {}", e, cause),
                        None => e.to_string(),
                    };
                    Err(ForwardError::Transport(message))
                }
            }
        })
    }
}
