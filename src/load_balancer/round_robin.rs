//! Round-robin selection over the configured base origins.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::OriginSelector;

/// Round-robin selector.
/// Stores an internal counter to rotate through origins.
#[derive(Debug)]
pub struct RoundRobin {
    origins: Vec<String>,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new(origins: Vec<String>) -> Self {
        Self {
            origins,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }
}

impl OriginSelector for RoundRobin {
    fn next_origin(&self) -> Option<&str> {
        match self.origins.len() {
            0 => None,
            1 => Some(&self.origins[0]),
            len => {
                let index = self.counter.fetch_add(1, Ordering::Relaxed) % len;
                Some(&self.origins[index])
            }
        }
    }
}
