//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//! - Detect duplicate services and instances
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, RetryConfig, ServiceConfig};
use crate::resilience::retries::RetryPolicy;

/// Names the HTTP layer serves itself; a service cannot shadow them.
pub const RESERVED_SERVICE_NAMES: &[&str] = &["health", "stats"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("duplicate service '{0}'")]
    DuplicateService(String),

    #[error("service name '{0}' is reserved")]
    ReservedServiceName(String),

    #[error("service '{service}': duplicate instance id '{instance}'")]
    DuplicateInstance { service: String, instance: String },

    #[error("service '{service}', instance '{instance}': invalid {field} '{value}'")]
    InvalidUrl {
        service: String,
        instance: String,
        field: &'static str,
        value: String,
    },

    #[error("service '{service}', instance '{instance}': timeout must be > 0")]
    ZeroInstanceTimeout { service: String, instance: String },

    #[error("service '{0}': circuit_breaker.max_failures must be > 0")]
    ZeroMaxFailures(String),

    #[error("{scope}: base delay {base_ms}ms exceeds max delay {max_ms}ms")]
    BackoffInverted { scope: String, base_ms: u64, max_ms: u64 },

    #[error("health_check.{0} must be > 0")]
    ZeroHealthCheckSetting(&'static str),

    #[error("invalid listener bind address '{0}'")]
    InvalidBindAddress(String),
}

/// Validate a full configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.health_check.enabled {
        if config.health_check.interval_ms == 0 {
            errors.push(ValidationError::ZeroHealthCheckSetting("interval_ms"));
        }
        if config.health_check.timeout_ms == 0 {
            errors.push(ValidationError::ZeroHealthCheckSetting("timeout_ms"));
        }
    }

    validate_retry(&config.retries, "retries", &mut errors);

    let mut names = HashSet::new();
    for service in &config.services {
        if service.name.is_empty() {
            errors.push(ValidationError::EmptyServiceName);
        } else if RESERVED_SERVICE_NAMES.contains(&service.name.as_str()) {
            errors.push(ValidationError::ReservedServiceName(service.name.clone()));
        }
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        validate_service(service, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    if service.circuit_breaker.max_failures == 0 {
        errors.push(ValidationError::ZeroMaxFailures(service.name.clone()));
    }

    if let Some(retry) = &service.retry {
        validate_retry(retry, &format!("service '{}' retry", service.name), errors);
    }

    let mut ids = HashSet::new();
    for instance in &service.instances {
        if !ids.insert(instance.id.as_str()) {
            errors.push(ValidationError::DuplicateInstance {
                service: service.name.clone(),
                instance: instance.id.clone(),
            });
        }

        let mut check_url = |field: &'static str, value: &str| {
            if !is_http_url(value) {
                errors.push(ValidationError::InvalidUrl {
                    service: service.name.clone(),
                    instance: instance.id.clone(),
                    field,
                    value: value.to_string(),
                });
            }
        };
        check_url("url", &instance.url);
        if let Some(health_url) = &instance.health_url {
            check_url("health_url", health_url);
        }

        if instance.timeout_ms == 0 {
            errors.push(ValidationError::ZeroInstanceTimeout {
                service: service.name.clone(),
                instance: instance.id.clone(),
            });
        }
    }
}

fn validate_retry(config: &RetryConfig, scope: &str, errors: &mut Vec<ValidationError>) {
    let policy = RetryPolicy::from_config(config);
    if policy.base_delay > policy.max_delay {
        errors.push(ValidationError::BackoffInverted {
            scope: scope.to_string(),
            base_ms: policy.base_delay.as_millis() as u64,
            max_ms: policy.max_delay.as_millis() as u64,
        });
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::InstanceConfig;

    fn instance(id: &str, url: &str) -> InstanceConfig {
        InstanceConfig {
            id: id.into(),
            url: url.into(),
            health_url: None,
            weight: 1,
            timeout_ms: 1000,
        }
    }

    fn service(name: &str, instances: Vec<InstanceConfig>) -> ServiceConfig {
        ServiceConfig {
            name: name.into(),
            strategy: Default::default(),
            instances,
            circuit_breaker: Default::default(),
            retry: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        let mut bad_instance = instance("a", "ftp://10.0.0.1");
        bad_instance.timeout_ms = 0;
        config.services.push(service("user-svc", vec![
            instance("a", "http://10.0.0.1:80"),
            bad_instance,
        ]));
        config.services.push(service("user-svc", vec![]));
        config.services.push(service("health", vec![]));

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateService("user-svc".into())));
        assert!(errors.contains(&ValidationError::ReservedServiceName("health".into())));
        assert!(errors.contains(&ValidationError::DuplicateInstance {
            service: "user-svc".into(),
            instance: "a".into(),
        }));
        assert!(errors.contains(&ValidationError::ZeroInstanceTimeout {
            service: "user-svc".into(),
            instance: "a".into(),
        }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidUrl { field: "url", .. })));
    }

    #[test]
    fn test_inverted_backoff() {
        let mut config = GatewayConfig::default();
        config.retries.base_delay_ms = Some(5_000);
        config.retries.max_delay_ms = Some(100);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::BackoffInverted { .. }));
    }

    #[test]
    fn test_zero_max_failures() {
        let mut config = GatewayConfig::default();
        let mut svc = service("chat-svc", vec![]);
        svc.circuit_breaker.max_failures = 0;
        config.services.push(svc);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::ZeroMaxFailures("chat-svc".into())]);
    }
}
