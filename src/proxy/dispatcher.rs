//! Request dispatch: select, forward, classify, retry.
//!
//! # Flow
//! ```text
//! buffer body (bounded)
//! loop:
//!     select instance ── none ──► 503
//!     forward and read the response under the instance deadline
//!     classify ──► feed the instance's circuit breaker
//!     retryable and attempts left? ── yes ──► backoff, loop
//! answer: upstream response, or 502 when no instance answered
//! ```
//!
//! The body is buffered once so every attempt can replay it. A connection
//! guard lives exactly as long as its attempt.

use axum::body::{Body, Bytes};
use axum::http::{header, request::Parts, Request, Response, StatusCode};
use std::time::{Duration, Instant};
use tokio::time;
use url::Url;

use crate::http::request::{request_id, strip_hop_by_hop, upstream_uri};
use crate::http::response::{error_response, upstream_response, ProxyError};
use crate::observability::metrics;
use crate::proxy::forward::ForwardError;
use crate::proxy::service::ServiceProxy;
use crate::resilience::Outcome;

/// One forwarded attempt.
#[derive(Debug)]
struct Attempt {
    number: u32,
    instance: String,
    started: Instant,
    outcome: Outcome,
}

impl Attempt {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl ServiceProxy {
    /// Forward a request to this service, retrying across instances.
    ///
    /// The request URI must already be relative to the service (the
    /// `/{service}` prefix removed).
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        self.retry_stats.record_request();

        let (parts, body) = request.into_parts();
        let request_id = request_id(&parts.headers).unwrap_or("-").to_string();

        let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(service = %self.name, request_id = %request_id, error = %e, "Rejecting request body");
                return self.reject(ProxyError::BodyTooLarge(self.max_body_bytes), None, 0, start);
            }
        };

        let mut attempts: u32 = 0;
        loop {
            let guard = match self.balancer.select() {
                Ok(guard) => guard,
                Err(e) => {
                    if attempts > 0 {
                        self.retry_stats.record_exhausted();
                    }
                    tracing::warn!(
                        service = %self.name,
                        request_id = %request_id,
                        attempts,
                        error = %e,
                        "No instance available"
                    );
                    return self.reject(ProxyError::NoInstancesAvailable(self.name.clone()), None, attempts, start);
                }
            };
            attempts += 1;
            let instance = guard.instance().clone();

            let upstream = match build_upstream(&parts, &body, instance.url()) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!(service = %self.name, instance = %instance.id(), error = %e, "Failed to build upstream request");
                    drop(guard);
                    return self.reject(ProxyError::Upstream(e.to_string()), Some(instance.id()), attempts, start);
                }
            };

            // Headers and body share the instance deadline, and the guard
            // stays held until the body is fully read.
            let started = Instant::now();
            let result = match time::timeout(instance.timeout(), self.exchange(upstream)).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(ForwardError::Transport(e))) => Err(Outcome::Transport(e)),
                Err(_) => Err(Outcome::Timeout(instance.timeout())),
            };
            let outcome = match &result {
                Ok(response) => self.classify(response.status()),
                Err(outcome) => outcome.clone(),
            };

            if outcome.is_success() {
                guard.record_success();
            } else {
                guard.record_failure();
            }

            let attempt = Attempt {
                number: attempts,
                instance: instance.id().to_string(),
                started,
                outcome,
            };
            tracing::debug!(
                service = %self.name,
                request_id = %request_id,
                instance = %attempt.instance,
                attempt = attempt.number,
                outcome = %attempt.outcome,
                elapsed = ?attempt.elapsed(),
                "Attempt finished"
            );

            if self.retry.should_retry(attempts, &attempt.outcome) {
                let delay = self.retry.next_delay(attempts);
                self.retry_stats.record_retry();
                metrics::record_retry(&self.name);
                tracing::info!(
                    service = %self.name,
                    request_id = %request_id,
                    instance = %attempt.instance,
                    attempt = attempt.number,
                    outcome = %attempt.outcome,
                    delay = ?delay,
                    "Retrying request"
                );
                drop(result);
                time::sleep(delay).await;
                continue;
            }

            if self.retry.classifier.is_retryable(&attempt.outcome) {
                self.retry_stats.record_exhausted();
            } else if attempts > 1 && resolved(&attempt.outcome) {
                self.retry_stats.record_retry_success();
            }

            return match result {
                Ok(response) => {
                    if !attempt.outcome.is_success() {
                        tracing::warn!(
                            service = %self.name,
                            request_id = %request_id,
                            instance = %attempt.instance,
                            attempts,
                            outcome = %attempt.outcome,
                            "Returning upstream error"
                        );
                    }
                    metrics::record_request(&self.name, response.status().as_u16(), &attempt.instance, start);
                    upstream_response(response, &self.name, &attempt.instance, attempts)
                }
                Err(outcome) => {
                    tracing::warn!(
                        service = %self.name,
                        request_id = %request_id,
                        instance = %attempt.instance,
                        attempts,
                        outcome = %outcome,
                        "Request failed"
                    );
                    self.reject(ProxyError::Upstream(outcome.to_string()), Some(&attempt.instance), attempts, start)
                }
            };
        }
    }

    /// Send one attempt and read the whole response body.
    async fn exchange(&self, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let response = self.forwarder.forward(request).await?;
        let (mut parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, self.max_response_bytes)
            .await
            .map_err(|e| ForwardError::Transport(format!("reading response body: {}", e)))?;
        parts.headers.remove(header::TRANSFER_ENCODING);
        Ok(Response::from_parts(parts, Body::from(bytes)))
    }

    /// Map an upstream status to an outcome as the circuit breaker sees it.
    fn classify(&self, status: StatusCode) -> Outcome {
        if status.is_server_error() && self.balancer.policy().count_server_errors {
            Outcome::Upstream(status)
        } else {
            Outcome::Success(status)
        }
    }

    fn reject(&self, error: ProxyError, instance: Option<&str>, attempts: u32, start: Instant) -> Response<Body> {
        metrics::record_request(&self.name, error.status().as_u16(), instance.unwrap_or("none"), start);
        error_response(error, &self.name, instance, attempts)
    }
}

/// A 2xx or 3xx answer, the only kind a retry can be credited with.
fn resolved(outcome: &Outcome) -> bool {
    matches!(outcome, Outcome::Success(status) if status.is_success() || status.is_redirection())
}

/// Fresh copy of the client request aimed at `base`.
fn build_upstream(parts: &Parts, body: &Bytes, base: &Url) -> Result<Request<Body>, axum::http::Error> {
    let uri = upstream_uri(base, parts.uri.path_and_query())?;

    let mut request = Request::new(Body::from(body.clone()));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = uri;
    *request.headers_mut() = parts.headers.clone();

    let headers = request.headers_mut();
    strip_hop_by_hop(headers);
    headers.remove(header::HOST);
    headers.remove(header::TRANSFER_ENCODING);
    Ok(request)
}
