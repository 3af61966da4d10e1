//! Service instance abstraction.
//!
//! # Responsibilities
//! - Represent a single replica of a logical service
//! - Track active connections (for Least Connections LB)
//! - Track health and circuit state behind a per-instance lock
//! - Hand out RAII guards so every dispatched request is counted exactly once

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use url::Url;

use crate::config::InstanceConfig;
use crate::observability::metrics;
use crate::resilience::{Admission, CircuitBreaker, CircuitPolicy, CircuitState, Transition};

#[derive(Debug)]
struct InstanceState {
    healthy: bool,
    breaker: CircuitBreaker,
}

/// One addressable replica of a service.
#[derive(Debug)]
pub struct ServiceInstance {
    service: String,
    id: String,
    url: Url,
    health_url: Url,
    weight: u32,
    timeout: Duration,
    active_connections: AtomicUsize,
    state: Mutex<InstanceState>,
}

/// Point-in-time view of an instance, for stats and admin output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub id: String,
    pub url: String,
    pub healthy: bool,
    pub circuit_state: CircuitState,
    pub active_connections: usize,
    pub consecutive_failures: u32,
}

impl ServiceInstance {
    /// Build an instance from configuration.
    ///
    /// `health_path` is used when the instance has no explicit health URL.
    pub fn from_config(
        service: &str,
        config: &InstanceConfig,
        health_path: &str,
        policy: CircuitPolicy,
    ) -> Result<Self, url::ParseError> {
        let url = Url::parse(&config.url)?;
        let health_url = match &config.health_url {
            Some(h) => Url::parse(h)?,
            None => url.join(health_path)?,
        };

        Ok(Self {
            service: service.to_string(),
            id: config.id.clone(),
            url,
            health_url,
            weight: config.weight,
            timeout: config.timeout(),
            active_connections: AtomicUsize::new(0),
            state: Mutex::new(InstanceState {
                healthy: true,
                breaker: CircuitBreaker::new(policy),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, InstanceState> {
        // State is plain data; a panicking holder cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Base URL requests are forwarded to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }

    /// Relative selection weight. Selection currently treats all weights as equal.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.lock().healthy
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.lock().breaker.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().breaker.consecutive_failures()
    }

    /// Time of the most recent request-path failure.
    pub fn last_failure_time(&self) -> Option<Instant> {
        self.lock().breaker.last_failure()
    }

    /// Healthy and not circuit-open (an elapsed Open circuit counts as eligible).
    pub fn is_eligible(&self, now: Instant) -> bool {
        let state = self.lock();
        state.healthy && state.breaker.can_admit(now)
    }

    /// Healthy flag set and circuit not Open. Used for health reporting.
    pub fn is_available(&self) -> bool {
        let state = self.lock();
        state.healthy && state.breaker.state() != CircuitState::Open
    }

    /// Try to admit one request to this instance.
    ///
    /// On success the active connection count has been incremented and the
    /// returned guard decrements it exactly once when dropped.
    pub fn try_acquire(self: &Arc<Self>, now: Instant) -> Option<ConnectionGuard> {
        let admission = {
            let mut state = self.lock();
            if !state.healthy {
                return None;
            }
            let (admission, transition) = state.breaker.try_admit(now);
            if admission == Admission::Rejected {
                return None;
            }
            // Counted under the lock so selection never sees an admitted
            // request without its connection.
            self.active_connections.fetch_add(1, Ordering::AcqRel);
            self.report(transition);
            admission
        };

        metrics::record_active_connections(&self.service, &self.id, self.active_connections());
        if admission == Admission::Trial {
            tracing::info!(service = %self.service, instance = %self.id, "Admitting half-open trial request");
        }

        Some(ConnectionGuard {
            instance: self.clone(),
            admission,
            resolved: false,
        })
    }

    /// Apply a health probe result.
    ///
    /// Probes gate eligibility only: a failed probe never counts toward the
    /// circuit breaker threshold.
    pub fn mark_probe_result(&self, healthy: bool) {
        let (changed, transition) = {
            let mut state = self.lock();
            let changed = state.healthy != healthy;
            state.healthy = healthy;
            let transition = if healthy {
                state.breaker.on_probe_success(Instant::now())
            } else {
                None
            };
            (changed, transition)
        };

        if changed {
            if healthy {
                tracing::info!(service = %self.service, instance = %self.id, "Instance became healthy");
            } else {
                tracing::warn!(service = %self.service, instance = %self.id, "Instance became unhealthy");
            }
        }
        self.report(transition);
        metrics::record_instance_health(&self.service, &self.id, healthy);
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let state = self.lock();
        InstanceSnapshot {
            id: self.id.clone(),
            url: self.url.to_string(),
            healthy: state.healthy,
            circuit_state: state.breaker.state(),
            active_connections: self.active_connections(),
            consecutive_failures: state.breaker.consecutive_failures(),
        }
    }

    fn finish(&self, admission: Admission, success: Option<bool>) {
        let transition = {
            let mut state = self.lock();
            match success {
                Some(true) => state.breaker.on_success(admission),
                Some(false) => state.breaker.on_failure(Instant::now(), admission),
                None => {
                    state.breaker.on_abandoned(admission);
                    None
                }
            }
        };
        self.report(transition);
    }

    fn release(&self) {
        let previous = self.active_connections.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "active connection count underflow");
        metrics::record_active_connections(&self.service, &self.id, previous.saturating_sub(1));
    }

    fn report(&self, transition: Option<Transition>) {
        let Some(t) = transition else { return };
        match t.to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                instance = %self.id,
                from = %t.from,
                "Circuit opened"
            ),
            _ => tracing::info!(
                service = %self.service,
                instance = %self.id,
                from = %t.from,
                to = %t.to,
                "Circuit state changed"
            ),
        }
        metrics::record_circuit_state(&self.service, &self.id, t.to);
    }
}

/// A RAII guard for one request dispatched to an instance.
///
/// Resolve it with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure); dropping it unresolved only
/// releases the connection slot (and a Half-Open trial gate, if held).
#[derive(Debug)]
pub struct ConnectionGuard {
    instance: Arc<ServiceInstance>,
    admission: Admission,
    resolved: bool,
}

impl ConnectionGuard {
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }

    /// True when this request is the single Half-Open trial.
    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    /// Non-failure outcome: resets the failure streak, closes a Half-Open circuit.
    pub fn record_success(mut self) {
        self.resolved = true;
        self.instance.finish(self.admission, Some(true));
    }

    /// Failure outcome: feeds the circuit breaker.
    pub fn record_failure(mut self) {
        self.resolved = true;
        self.instance.finish(self.admission, Some(false));
    }
}

impl Deref for ConnectionGuard {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.resolved {
            self.instance.finish(self.admission, None);
        }
        self.instance.release();
    }
}
