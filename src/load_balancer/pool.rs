//! Instance pool for one logical service.
//!
//! # Responsibilities
//! - Own the instance list of a service and swap it wholesale on reconfiguration
//! - Filter the eligible set and apply the selection strategy
//! - Provide connection guards for tracking

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::{InstanceConfig, Strategy};
use crate::load_balancer::{
    instance::{ConnectionGuard, InstanceSnapshot, ServiceInstance},
    Selector,
};
use crate::resilience::CircuitPolicy;

/// Why no instance could be chosen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no instances available for service '{0}'")]
    NoInstancesAvailable(String),
}

/// Owns the instances of one logical service and selects among them.
#[derive(Debug)]
pub struct LoadBalancer {
    service: String,
    strategy: Strategy,
    selector: Selector,
    policy: CircuitPolicy,
    health_path: String,
    instances: ArcSwap<Vec<Arc<ServiceInstance>>>,
}

impl LoadBalancer {
    /// Create a pool from configuration. Instances with unparsable URLs are skipped.
    pub fn new(
        service: &str,
        strategy: Strategy,
        policy: CircuitPolicy,
        health_path: &str,
        configs: &[InstanceConfig],
    ) -> Self {
        let instances = build_instances(service, configs, health_path, policy);
        Self {
            service: service.to_string(),
            strategy,
            selector: Selector::new(strategy),
            policy,
            health_path: health_path.to_string(),
            instances: ArcSwap::from_pointee(instances),
        }
    }

    /// Pool over already-built instances.
    pub fn from_instances(
        service: &str,
        strategy: Strategy,
        instances: Vec<Arc<ServiceInstance>>,
    ) -> Self {
        Self {
            service: service.to_string(),
            strategy,
            selector: Selector::new(strategy),
            policy: CircuitPolicy::default(),
            health_path: "/health".to_string(),
            instances: ArcSwap::from_pointee(instances),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn policy(&self) -> &CircuitPolicy {
        &self.policy
    }

    /// Current instance list. Callers keep a consistent snapshot even if the
    /// list is replaced while they hold it.
    pub fn instances(&self) -> Arc<Vec<Arc<ServiceInstance>>> {
        self.instances.load_full()
    }

    /// Atomically replace the whole instance list.
    pub fn replace_instances(&self, configs: &[InstanceConfig]) {
        let instances = build_instances(&self.service, configs, &self.health_path, self.policy);
        tracing::info!(
            service = %self.service,
            instance_count = instances.len(),
            "Replacing instance list"
        );
        self.instances.store(Arc::new(instances));
    }

    /// Select an instance and admit a request to it.
    ///
    /// The eligible set is computed once from a single list snapshot. If the
    /// picked instance refuses admission (another caller won its Half-Open
    /// trial), it is dropped from the set and selection runs again.
    pub fn select(&self) -> Result<ConnectionGuard, SelectError> {
        let snapshot = self.instances.load();
        let now = Instant::now();

        let mut eligible: Vec<Arc<ServiceInstance>> = snapshot
            .iter()
            .filter(|i| i.is_eligible(now))
            .cloned()
            .collect();

        while let Some(idx) = self.selector.pick(&eligible) {
            if let Some(guard) = eligible[idx].try_acquire(now) {
                return Ok(guard);
            }
            eligible.remove(idx);
        }

        tracing::debug!(
            service = %self.service,
            instance_count = snapshot.len(),
            "No eligible instances"
        );
        for i in snapshot.iter() {
            tracing::trace!(instance = %i.id(), snapshot = ?i.snapshot(), "Instance status");
        }
        Err(SelectError::NoInstancesAvailable(self.service.clone()))
    }

    pub fn total_count(&self) -> usize {
        self.instances.load().len()
    }

    /// Instances with the healthy flag set and a circuit that is not Open.
    pub fn healthy_count(&self) -> usize {
        self.instances.load().iter().filter(|i| i.is_available()).count()
    }

    pub fn snapshots(&self) -> Vec<InstanceSnapshot> {
        self.instances.load().iter().map(|i| i.snapshot()).collect()
    }
}

fn build_instances(
    service: &str,
    configs: &[InstanceConfig],
    health_path: &str,
    policy: CircuitPolicy,
) -> Vec<Arc<ServiceInstance>> {
    configs
        .iter()
        .filter_map(|config| match ServiceInstance::from_config(service, config, health_path, policy) {
            Ok(instance) => Some(Arc::new(instance)),
            Err(e) => {
                tracing::warn!(service = %service, instance = %config.id, error = %e, "Invalid instance URL, skipping");
                None
            }
        })
        .collect()
}
