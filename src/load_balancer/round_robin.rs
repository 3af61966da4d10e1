//! Round-robin load balancing strategy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::load_balancer::instance::ServiceInstance;

/// Round-robin selector.
/// Stores an internal cursor to rotate through the eligible set.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the cursor and return the index it lands on.
    ///
    /// `fetch_add` makes read-and-advance a single step, so concurrent
    /// callers never observe the same cursor value.
    pub fn pick(&self, eligible: &[Arc<ServiceInstance>]) -> Option<usize> {
        if eligible.is_empty() {
            return None;
        }
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(cursor % eligible.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::instance::tests::instance;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let instances = vec![instance("a", 8080), instance("b", 8081)];

        assert_eq!(lb.pick(&instances), Some(0));
        assert_eq!(lb.pick(&instances), Some(1));
        assert_eq!(lb.pick(&instances), Some(0));
        assert_eq!(lb.pick(&[]), None);
    }

    #[test]
    fn test_fair_over_uneven_counts() {
        let lb = RoundRobin::new();
        let instances = vec![instance("a", 1), instance("b", 2), instance("c", 3)];
        let mut hits = [0usize; 3];
        for _ in 0..10 {
            hits[lb.pick(&instances).unwrap()] += 1;
        }
        for h in hits {
            assert!(h == 3 || h == 4);
        }
    }

    #[test]
    fn test_concurrent_callers_partition_evenly() {
        let lb = Arc::new(RoundRobin::new());
        let instances = Arc::new(vec![instance("a", 1), instance("b", 2), instance("c", 3), instance("d", 4)]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lb = lb.clone();
                let instances = instances.clone();
                std::thread::spawn(move || {
                    let mut hits = [0usize; 4];
                    for _ in 0..1000 {
                        hits[lb.pick(&instances).unwrap()] += 1;
                    }
                    hits
                })
            })
            .collect();

        let mut total = [0usize; 4];
        for h in handles {
            for (t, n) in total.iter_mut().zip(h.join().unwrap()) {
                *t += n;
            }
        }
        assert_eq!(total, [2000; 4]);
    }
}
