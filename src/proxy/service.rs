//! One logical service: its pool, retry policy and health checker.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{GatewayConfig, InstanceConfig, ServiceConfig, Strategy};
use crate::health::HealthChecker;
use crate::load_balancer::{InstanceSnapshot, LoadBalancer};
use crate::proxy::forward::Forwarder;
use crate::resilience::{CircuitPolicy, RetryPolicy, RetryStats, RetryStatsSnapshot};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Status of a pool with `healthy` of `total` instances available.
    pub fn from_counts(healthy: usize, total: usize) -> Self {
        if healthy == 0 {
            HealthStatus::Unhealthy
        } else if healthy < total {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub total_instances: usize,
    pub healthy_instances: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceStats {
    pub service: String,
    pub strategy: Strategy,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub retries: RetryStatsSnapshot,
    pub instances: Vec<InstanceSnapshot>,
}

pub struct ServiceProxy {
    pub(crate) name: String,
    pub(crate) config: ArcSwap<ServiceConfig>,
    pub(crate) balancer: Arc<LoadBalancer>,
    pub(crate) retry: RetryPolicy,
    pub(crate) retry_stats: RetryStats,
    pub(crate) checker: HealthChecker,
    pub(crate) forwarder: Arc<dyn Forwarder>,
    pub(crate) max_body_bytes: usize,
    pub(crate) max_response_bytes: usize,
}

impl ServiceProxy {
    pub fn new(config: &ServiceConfig, gateway: &GatewayConfig, forwarder: Arc<dyn Forwarder>) -> Self {
        let policy = CircuitPolicy::from(&config.circuit_breaker);
        let balancer = Arc::new(LoadBalancer::new(
            &config.name,
            config.strategy,
            policy,
            &gateway.health_check.path,
            &config.instances,
        ));
        let retry = RetryPolicy::from_config(config.retry.as_ref().unwrap_or(&gateway.retries));
        let checker = HealthChecker::new(balancer.clone(), gateway.health_check.clone());

        tracing::info!(
            service = %config.name,
            strategy = %config.strategy,
            instances = balancer.total_count(),
            max_retries = retry.max_retries,
            "Service registered"
        );

        Self {
            name: config.name.clone(),
            config: ArcSwap::from_pointee(config.clone()),
            balancer,
            retry,
            retry_stats: RetryStats::default(),
            checker,
            forwarder,
            max_body_bytes: gateway.timeouts.max_body_bytes,
            max_response_bytes: gateway.timeouts.max_response_bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<ServiceConfig> {
        self.config.load_full()
    }

    /// Swap in a new instance list, keeping strategy, policies and counters.
    pub fn replace_instances(&self, instances: &[InstanceConfig]) {
        self.balancer.replace_instances(instances);
        let mut config = ServiceConfig::clone(&self.config.load());
        config.instances = instances.to_vec();
        self.config.store(Arc::new(config));
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn health_checker(&self) -> &HealthChecker {
        &self.checker
    }

    pub fn start_health_checking(&self) -> bool {
        self.checker.start()
    }

    pub async fn stop_health_checking(&self) {
        self.checker.stop().await;
    }

    pub fn health(&self) -> ServiceHealth {
        let total = self.balancer.total_count();
        let healthy = self.balancer.healthy_count();
        ServiceHealth {
            status: HealthStatus::from_counts(healthy, total),
            total_instances: total,
            healthy_instances: healthy,
        }
    }

    pub fn stats(&self) -> ServiceStats {
        let instances = self.balancer.snapshots();
        let healthy_instances = self.balancer.healthy_count();
        ServiceStats {
            service: self.name.clone(),
            strategy: self.balancer.strategy(),
            total_instances: instances.len(),
            healthy_instances,
            retries: self.retry_stats.snapshot(),
            instances,
        }
    }
}
