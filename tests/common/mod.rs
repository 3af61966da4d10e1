//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use service_gateway::config::{GatewayConfig, InstanceConfig, RetryConfig, ServiceConfig, Strategy};
use service_gateway::{Gateway, HttpServer, Shutdown};

/// A mock instance whose behaviour can be changed while it runs.
///
/// `/health` answers 200 or 503 according to `set_healthy`; every other
/// path answers `set_status` with the backend name as body and is counted.
#[derive(Clone)]
pub struct Backend {
    pub name: &'static str,
    pub url: String,
    hits: Arc<AtomicUsize>,
    status: Arc<AtomicU16>,
    healthy: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
}

impl Backend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn instance(&self) -> InstanceConfig {
        InstanceConfig {
            id: self.name.to_string(),
            url: self.url.clone(),
            health_url: None,
            weight: 1,
            timeout_ms: 2_000,
        }
    }
}

pub async fn start_backend(name: &'static str, status: u16) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = Backend {
        name,
        url: format!("http://{}", listener.local_addr().unwrap()),
        hits: Arc::new(AtomicUsize::new(0)),
        status: Arc::new(AtomicU16::new(status)),
        healthy: Arc::new(AtomicBool::new(true)),
        delay_ms: Arc::new(AtomicU64::new(0)),
    };

    let state = backend.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let state = state.clone();
            tokio::spawn(async move { serve(socket, state).await });
        }
    });

    backend
}

async fn serve(mut socket: TcpStream, backend: Backend) {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

    let (status, body) = if path.starts_with("/health") {
        if backend.healthy.load(Ordering::SeqCst) {
            (200, "ok".to_string())
        } else {
            (503, "down".to_string())
        }
    } else {
        backend.hits.fetch_add(1, Ordering::SeqCst);
        let delay = backend.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        (backend.status.load(Ordering::SeqCst), backend.name.to_string())
    };

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nX-Echo-Path: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        path,
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// An address nothing listens on.
pub async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn service(name: &str, strategy: Strategy, instances: Vec<InstanceConfig>) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        strategy,
        instances,
        circuit_breaker: Default::default(),
        retry: None,
    }
}

/// Health checks off, fast deterministic retries.
pub fn base_config(services: Vec<ServiceConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.health_check.enabled = false;
    config.health_check.interval_ms = 50;
    config.health_check.timeout_ms = 500;
    config.retries = RetryConfig {
        max_retries: Some(2),
        base_delay_ms: Some(5),
        max_delay_ms: Some(20),
        jitter: Some(false),
        ..Default::default()
    };
    config.observability.metrics_enabled = false;
    config.services = services;
    config
}

pub struct TestGateway {
    pub url: String,
    pub gateway: Arc<Gateway>,
    pub updates: mpsc::UnboundedSender<GatewayConfig>,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let server = HttpServer::new(config);
    let gateway = server.gateway().clone();
    let (updates, config_updates) = mpsc::unbounded_channel();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    TestGateway {
        url,
        gateway,
        updates,
        shutdown,
    }
}
