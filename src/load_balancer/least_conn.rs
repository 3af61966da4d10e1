//! Least Connections load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::instance::ServiceInstance;

/// Least connections selector.
/// Selects the instance with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick(&self, eligible: &[Arc<ServiceInstance>]) -> Option<usize> {
        // Read each counter once so the comparison runs on a single snapshot.
        // Ties go to the lowest instance id, keeping the choice reproducible.
        eligible
            .iter()
            .map(|i| (i.active_connections(), i.id()))
            .enumerate()
            .min_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(idx, _)| idx)
    }
}
