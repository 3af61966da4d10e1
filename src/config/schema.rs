//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Logical services and their instance pools.
    pub services: Vec<ServiceConfig>,

    /// Health check settings shared by every service.
    pub health_check: HealthCheckConfig,

    /// Gateway-wide retry policy, overridable per service.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Load balancing strategy for a service.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::RoundRobin => write!(f, "round-robin"),
            Strategy::Random => write!(f, "random"),
            Strategy::LeastConnections => write!(f, "least-connections"),
        }
    }
}

/// A logical backend service (e.g. "user-svc").
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Service name, used as the first path segment of routed requests.
    pub name: String,

    /// Selection strategy across eligible instances.
    #[serde(default)]
    pub strategy: Strategy,

    /// Interchangeable replicas of this service.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,

    /// Per-instance circuit breaker policy.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy override; falls back to the gateway-wide policy.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ServiceConfig {
    /// True when `other` differs from `self` only in its instance list.
    pub fn same_policy(&self, other: &ServiceConfig) -> bool {
        self.name == other.name
            && self.strategy == other.strategy
            && self.circuit_breaker == other.circuit_breaker
            && self.retry == other.retry
    }
}

/// One addressable replica of a service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InstanceConfig {
    /// Identifier, unique within its service.
    pub id: String,

    /// Base URL requests are forwarded to (e.g., "http://10.0.0.5:3000").
    pub url: String,

    /// Health probe target. Defaults to `url` + `health_check.path`.
    #[serde(default)]
    pub health_url: Option<String>,

    /// Relative selection weight (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Per-request deadline in milliseconds.
    #[serde(default = "default_instance_timeout_ms")]
    pub timeout_ms: u64,
}

impl InstanceConfig {
    /// Per-request deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_weight() -> u32 {
    1
}

fn default_instance_timeout_ms() -> u64 {
    30_000
}

/// Circuit breaker policy applied to every instance of a service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive request failures that open the circuit.
    pub max_failures: u32,

    /// A failure arriving later than this after the previous one starts a new streak.
    pub circuit_timeout_ms: u64,

    /// How long an open circuit waits before admitting a trial request.
    pub recovery_timeout_ms: u64,

    /// Whether upstream 5xx responses count as failures.
    pub count_server_errors: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            circuit_timeout_ms: 60_000,
            recovery_timeout_ms: 30_000,
            count_server_errors: true,
        }
    }
}

/// Named retry parameter presets.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryProfile {
    #[default]
    Default,
    Aggressive,
    Conservative,
}

/// Retry configuration: a profile plus optional per-field overrides.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct RetryConfig {
    /// Preset the overrides below are applied on top of.
    pub profile: RetryProfile,

    /// Maximum number of retries after the first attempt.
    pub max_retries: Option<u32>,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: Option<u64>,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: Option<u64>,

    /// Full jitter on computed delays.
    pub jitter: Option<bool>,

    /// Which outcomes are worth another attempt.
    pub retry_on: RetryOnConfig,
}

/// Retryability classifier knobs.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryOnConfig {
    /// Retry upstream 5xx responses.
    pub server_errors: bool,

    /// Retry connection refused / reset errors.
    pub transport_errors: bool,

    /// Retry calls that exceeded the instance deadline.
    pub timeouts: bool,

    /// Additional status codes to retry (e.g., 429).
    pub extra_statuses: Vec<u16>,
}

impl Default for RetryOnConfig {
    fn default() -> Self {
        Self {
            server_errors: true,
            transport_errors: true,
            timeouts: true,
            extra_statuses: Vec::new(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable background health probing.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path probed when an instance has no explicit health URL.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            timeout_ms: 2_000,
            path: "/health".to_string(),
        }
    }
}

/// Timeout and buffering limits for the HTTP layer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outer deadline for a whole request, retries included, in seconds.
    pub request_secs: u64,

    /// Largest request body buffered for retries.
    pub max_body_bytes: usize,

    /// Largest upstream response body read within an attempt.
    pub max_response_bytes: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            max_response_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
