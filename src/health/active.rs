//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every instance of one service
//! - Update instance health state based on results
//! - Start and stop cleanly, independently of request traffic

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use axum::body::Body;
use axum::http::{Request, Uri};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::Instrument;

use crate::config::HealthCheckConfig;
use crate::load_balancer::{instance::ServiceInstance, LoadBalancer};

/// Probes the instances of a service; shared by the background task.
struct Prober {
    service: String,
    balancer: Arc<LoadBalancer>,
    client: Client<HttpConnector, Body>,
    timeout: Duration,
    probes: AtomicU64,
}

struct ProbeTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background health checker for one logical service.
pub struct HealthChecker {
    prober: Arc<Prober>,
    config: HealthCheckConfig,
    task: Mutex<Option<ProbeTask>>,
}

impl HealthChecker {
    pub fn new(balancer: Arc<LoadBalancer>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpConnector::new());

        Self {
            prober: Arc::new(Prober {
                service: balancer.service().to_string(),
                balancer,
                client,
                timeout: Duration::from_millis(config.timeout_ms),
                probes: AtomicU64::new(0),
            }),
            config,
            task: Mutex::new(None),
        }
    }

    /// Total probes started since creation.
    pub fn probe_count(&self) -> u64 {
        self.prober.probes.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        task.as_ref().map(|t| !t.handle.is_finished()).unwrap_or(false)
    }

    /// Spawn the probe loop. Returns false when disabled or already running.
    pub fn start(&self) -> bool {
        if !self.config.enabled {
            tracing::info!(service = %self.prober.service, "Active health checks disabled");
            return false;
        }

        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if task.as_ref().map(|t| !t.handle.is_finished()).unwrap_or(false) {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let interval = Duration::from_millis(self.config.interval_ms.max(1));
        let span = tracing::info_span!("health_checker", service = %self.prober.service);
        let handle = tokio::spawn(run(self.prober.clone(), interval, stop_rx).instrument(span));

        *task = Some(ProbeTask { stop_tx, handle });
        true
    }

    /// Stop the probe loop and wait for it to exit.
    ///
    /// An in-flight probe round is allowed to finish; no new round starts
    /// once the stop signal is observed. Calling this when not running is a no-op.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(task) = task else { return };

        let _ = task.stop_tx.send(true);
        if let Err(e) = task.handle.await {
            tracing::error!(service = %self.prober.service, error = %e, "Health checker task failed");
        }
    }

    /// Run a single probe round now.
    pub async fn check_now(&self) {
        self.prober.check_all().await;
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            let _ = task.stop_tx.send(true);
        }
    }
}

async fn run(prober: Arc<Prober>, interval: Duration, mut stop: watch::Receiver<bool>) {
    tracing::info!(interval = ?interval, timeout = ?prober.timeout, "Health checker starting");

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                if *stop.borrow() {
                    break;
                }
                prober.check_all().await;
            }
        }
    }

    tracing::info!("Health checker stopped");
}

impl Prober {
    async fn check_all(&self) {
        let instances = self.balancer.instances();
        join_all(instances.iter().map(|i| self.check(i))).await;
    }

    async fn check(&self, instance: &ServiceInstance) {
        self.probes.fetch_add(1, Ordering::AcqRel);
        let healthy = self.probe(instance).await;
        instance.mark_probe_result(healthy);
    }

    async fn probe(&self, instance: &ServiceInstance) -> bool {
        let target = instance.health_url();
        let uri: Uri = match target.as_str().parse() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(instance = %instance.id(), error = %e, "Invalid health URL");
                return false;
            }
        };

        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "service-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(instance = %instance.id(), error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::debug!(instance = %instance.id(), status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::debug!(instance = %instance.id(), error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!(instance = %instance.id(), "Health check failed: timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use crate::config::{InstanceConfig, Strategy};
    use crate::resilience::{CircuitPolicy, CircuitState};

    async fn health_backend(status_line: &'static str) -> (String, Arc<AtomicU64>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (format!("http://{}", addr), hits)
    }

    fn balancer(urls: &[String], policy: CircuitPolicy) -> Arc<LoadBalancer> {
        let configs: Vec<_> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| InstanceConfig {
                id: format!("i{}", i),
                url: url.clone(),
                health_url: None,
                weight: 1,
                timeout_ms: 1000,
            })
            .collect();
        Arc::new(LoadBalancer::new("svc", Strategy::RoundRobin, policy, "/health", &configs))
    }

    fn config(interval_ms: u64) -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_ms,
            timeout_ms: 500,
            path: "/health".into(),
        }
    }

    #[tokio::test]
    async fn test_probe_marks_health() {
        let (up, _) = health_backend("200 OK").await;
        let (down, _) = health_backend("503 Service Unavailable").await;
        let lb = balancer(&[up, down, "http://127.0.0.1:1".to_string()], CircuitPolicy::default());
        let checker = HealthChecker::new(lb.clone(), config(1000));

        checker.check_now().await;

        let instances = lb.instances();
        assert!(instances[0].is_healthy());
        assert!(!instances[1].is_healthy());
        assert!(!instances[2].is_healthy());
        // Probe failures never feed the circuit breaker
        assert!(instances.iter().all(|i| i.consecutive_failures() == 0));
        assert!(instances.iter().all(|i| i.circuit_state() == CircuitState::Closed));
        assert_eq!(lb.healthy_count(), 1);
    }

    #[tokio::test]
    async fn test_probe_success_moves_open_to_half_open() {
        let (up, _) = health_backend("200 OK").await;
        let policy = CircuitPolicy {
            max_failures: 1,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_millis(20),
            count_server_errors: true,
        };
        let lb = balancer(&[up], policy);
        let instance = lb.instances()[0].clone();
        instance.try_acquire(Instant::now()).unwrap().record_failure();
        assert_eq!(instance.circuit_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let checker = HealthChecker::new(lb.clone(), config(1000));
        checker.check_now().await;
        assert_eq!(instance.circuit_state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (up, hits) = health_backend("200 OK").await;
        let lb = balancer(&[up], CircuitPolicy::default());
        let checker = HealthChecker::new(lb, config(20));

        assert!(checker.start());
        assert!(!checker.start(), "second start is a no-op");
        assert!(checker.is_running());

        tokio::time::sleep(Duration::from_millis(120)).await;
        checker.stop().await;
        assert!(!checker.is_running());

        let probes = checker.probe_count();
        assert!(probes >= 2, "expected several probes, got {}", probes);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(checker.probe_count(), probes, "no probes after stop");
        assert_eq!(hits.load(Ordering::SeqCst), probes);

        // Idempotent
        checker.stop().await;
        assert!(checker.start(), "can restart after stop");
        checker.stop().await;
    }

    #[tokio::test]
    async fn test_disabled() {
        let lb = balancer(&[], CircuitPolicy::default());
        let mut cfg = config(20);
        cfg.enabled = false;
        let checker = HealthChecker::new(lb, cfg);
        assert!(!checker.start());
        assert!(!checker.is_running());
        checker.stop().await;
    }
}
