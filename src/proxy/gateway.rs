//! Registry of services by name.
//!
//! # Responsibilities
//! - Route a request to its service proxy
//! - Aggregate stats and health across services
//! - Apply reloaded configuration without dropping in-flight requests

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, Response};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::http::response::{error_response, ProxyError};
use crate::proxy::forward::{Forwarder, HttpForwarder};
use crate::proxy::service::{HealthStatus, ServiceHealth, ServiceProxy, ServiceStats};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub services: BTreeMap<String, ServiceHealth>,
}

impl GatewayHealth {
    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }
}

pub struct Gateway {
    services: DashMap<String, Arc<ServiceProxy>>,
    config: ArcSwap<GatewayConfig>,
    forwarder: Arc<dyn Forwarder>,
    health_running: AtomicBool,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_forwarder(config, Arc::new(HttpForwarder::new()))
    }

    pub fn with_forwarder(config: GatewayConfig, forwarder: Arc<dyn Forwarder>) -> Self {
        let services = DashMap::new();
        for service in &config.services {
            let proxy = ServiceProxy::new(service, &config, forwarder.clone());
            services.insert(service.name.clone(), Arc::new(proxy));
        }

        Self {
            services,
            config: ArcSwap::from_pointee(config),
            forwarder,
            health_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceProxy>> {
        self.services.get(name).map(|entry| entry.value().clone())
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Dispatch a request whose URI has already been stripped of `/{service}`.
    pub async fn dispatch(&self, service: &str, request: Request<Body>) -> Response<Body> {
        match self.service(service) {
            Some(proxy) => proxy.dispatch(request).await,
            None => {
                tracing::debug!(service = %service, "Unknown service");
                error_response(ProxyError::UnknownService(service.to_string()), service, None, 0)
            }
        }
    }

    pub fn stats(&self) -> Vec<ServiceStats> {
        let mut stats: Vec<ServiceStats> = self.services.iter().map(|e| e.value().stats()).collect();
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }

    pub fn service_stats(&self, name: &str) -> Option<ServiceStats> {
        self.service(name).map(|proxy| proxy.stats())
    }

    /// Healthy when every service is, unhealthy when every service is.
    pub fn health_report(&self) -> GatewayHealth {
        let services: BTreeMap<String, ServiceHealth> = self
            .services
            .iter()
            .map(|e| (e.key().clone(), e.value().health()))
            .collect();

        let status = if services.values().all(|s| s.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if services.values().all(|s| s.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        GatewayHealth { status, services }
    }

    pub fn start_health_checking(&self) {
        self.health_running.store(true, Ordering::Release);
        for proxy in self.proxies() {
            proxy.start_health_checking();
        }
    }

    pub async fn stop_health_checking(&self) {
        self.health_running.store(false, Ordering::Release);
        for proxy in self.proxies() {
            proxy.stop_health_checking().await;
        }
    }

    /// Apply a new configuration.
    ///
    /// Services whose policy is unchanged keep their proxy and only swap
    /// their instance list; changed services are rebuilt; removed services
    /// are stopped. Requests already in flight finish on the objects they
    /// started with.
    pub async fn reconfigure(&self, config: GatewayConfig) {
        let previous = self.config.load_full();
        let shared_changed = previous.health_check != config.health_check
            || previous.retries != config.retries
            || previous.timeouts != config.timeouts;
        let run_health = self.health_running.load(Ordering::Acquire);

        for service in &config.services {
            let existing = self.service(&service.name);
            match existing {
                Some(current) if !shared_changed && current.config().same_policy(service) => {
                    if current.config().instances != service.instances {
                        current.replace_instances(&service.instances);
                        tracing::info!(service = %service.name, instances = service.instances.len(), "Instance list replaced");
                    }
                }
                Some(current) => {
                    let replacement = Arc::new(ServiceProxy::new(service, &config, self.forwarder.clone()));
                    current.stop_health_checking().await;
                    self.services.insert(service.name.clone(), replacement.clone());
                    if run_health {
                        replacement.start_health_checking();
                    }
                    tracing::info!(service = %service.name, "Service rebuilt");
                }
                None => {
                    let proxy = Arc::new(ServiceProxy::new(service, &config, self.forwarder.clone()));
                    self.services.insert(service.name.clone(), proxy.clone());
                    if run_health {
                        proxy.start_health_checking();
                    }
                    tracing::info!(service = %service.name, "Service added");
                }
            }
        }

        let removed: Vec<String> = self
            .services
            .iter()
            .filter(|e| config.service(e.key()).is_none())
            .map(|e| e.key().clone())
            .collect();
        for name in removed {
            if let Some((_, proxy)) = self.services.remove(&name) {
                proxy.stop_health_checking().await;
                tracing::info!(service = %name, "Service removed");
            }
        }

        self.config.store(Arc::new(config));
    }

    fn proxies(&self) -> Vec<Arc<ServiceProxy>> {
        self.services.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstanceConfig, ServiceConfig, Strategy};
    use axum::http::StatusCode;

    fn instance(id: &str, port: u16) -> InstanceConfig {
        InstanceConfig {
            id: id.to_string(),
            url: format!("http://127.0.0.1:{}", port),
            health_url: None,
            weight: 1,
            timeout_ms: 1000,
        }
    }

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.health_check.enabled = false;
        config.services = vec![
            ServiceConfig {
                name: "user-svc".into(),
                strategy: Strategy::RoundRobin,
                instances: vec![instance("u1", 3001), instance("u2", 3002)],
                circuit_breaker: Default::default(),
                retry: None,
            },
            ServiceConfig {
                name: "chat-svc".into(),
                strategy: Strategy::LeastConnections,
                instances: vec![instance("c1", 4001)],
                circuit_breaker: Default::default(),
                retry: None,
            },
        ];
        config
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let gateway = Gateway::new(config());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = gateway.dispatch("nope", request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_health_report() {
        let gateway = Gateway::new(config());
        assert_eq!(gateway.health_report().status, HealthStatus::Healthy);

        gateway.service("user-svc").unwrap().balancer().instances()[0].mark_probe_result(false);
        let report = gateway.health_report();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.services["user-svc"].status, HealthStatus::Degraded);
        assert_eq!(report.services["chat-svc"].status, HealthStatus::Healthy);

        for name in ["user-svc", "chat-svc"] {
            for i in gateway.service(name).unwrap().balancer().instances().iter() {
                i.mark_probe_result(false);
            }
        }
        assert!(gateway.health_report().is_unhealthy());
    }

    #[test]
    fn test_stats_sorted() {
        let gateway = Gateway::new(config());
        let stats = gateway.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].service, "chat-svc");
        assert_eq!(stats[1].service, "user-svc");
        assert!(gateway.service_stats("missing").is_none());
    }

    #[tokio::test]
    async fn test_reconfigure() {
        let gateway = Gateway::new(config());
        let user_before = gateway.service("user-svc").unwrap();
        let chat_before = gateway.service("chat-svc").unwrap();

        let mut next = config();
        // Instance-only change keeps the proxy
        next.services[0].instances.push(instance("u3", 3003));
        // Policy change rebuilds
        next.services[1].strategy = Strategy::Random;
        next.services.push(ServiceConfig {
            name: "search-svc".into(),
            strategy: Strategy::RoundRobin,
            instances: vec![instance("s1", 5001)],
            circuit_breaker: Default::default(),
            retry: None,
        });
        gateway.reconfigure(next).await;

        let user_after = gateway.service("user-svc").unwrap();
        assert!(Arc::ptr_eq(&user_before, &user_after));
        assert_eq!(user_after.balancer().total_count(), 3);

        let chat_after = gateway.service("chat-svc").unwrap();
        assert!(!Arc::ptr_eq(&chat_before, &chat_after));
        assert_eq!(chat_after.balancer().strategy(), Strategy::Random);

        assert_eq!(gateway.service_names(), vec!["chat-svc", "search-svc", "user-svc"]);

        let mut smaller = config();
        smaller.services.truncate(1);
        gateway.reconfigure(smaller).await;
        assert_eq!(gateway.service_names(), vec!["user-svc"]);
    }
}
