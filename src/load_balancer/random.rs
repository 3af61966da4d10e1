//! Random load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::instance::ServiceInstance;

/// Uniform random selector. Carries no state between calls.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }

    pub fn pick(&self, eligible: &[Arc<ServiceInstance>]) -> Option<usize> {
        if eligible.is_empty() {
            return None;
        }
        Some(fastrand::usize(..eligible.len()))
    }
}
