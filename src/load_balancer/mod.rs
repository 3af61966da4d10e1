//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher asks for an instance of a service
//!     → pool.rs (snapshot instance list, filter eligible)
//!     → Selector applies the service's strategy:
//!         - round_robin.rs (rotate through eligible instances)
//!         - random.rs (uniform pick)
//!         - least_conn.rs (pick instance with fewest connections)
//!     → instance.rs (admit request, hand out connection guard)
//!     → Return guard or NoInstancesAvailable
//! ```
//!
//! # Design Decisions
//! - Strategy set is closed; one match at selection time
//! - Unhealthy and circuit-open instances excluded from selection
//! - Instance list swapped as a whole; per-instance state behind its own lock

pub mod instance;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod round_robin;

use std::sync::Arc;

use crate::config::Strategy;
use self::instance::ServiceInstance;

pub use instance::{ConnectionGuard, InstanceSnapshot};
pub use pool::{LoadBalancer, SelectError};

/// Strategy state, one variant per supported algorithm.
#[derive(Debug)]
pub enum Selector {
    RoundRobin(round_robin::RoundRobin),
    Random(random::Random),
    LeastConnections(least_conn::LeastConnections),
}

impl Selector {
    pub fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::RoundRobin => Selector::RoundRobin(round_robin::RoundRobin::new()),
            Strategy::Random => Selector::Random(random::Random::new()),
            Strategy::LeastConnections => Selector::LeastConnections(least_conn::LeastConnections::new()),
        }
    }

    /// Index into `eligible` of the chosen instance, `None` when empty.
    pub fn pick(&self, eligible: &[Arc<ServiceInstance>]) -> Option<usize> {
        match self {
            Selector::RoundRobin(s) => s.pick(eligible),
            Selector::Random(s) => s.pick(eligible),
            Selector::LeastConnections(s) => s.pick(eligible),
        }
    }
}
