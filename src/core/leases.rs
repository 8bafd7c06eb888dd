// src/core/leases.rs

//! Named expiring leases. A lease is created with a fixed period, renewed by
//! use and cancelled explicitly; the lease-checker task drains due leases
//! and invokes the owner's expiry handling.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Leases {
    period: Duration,
    deadlines: Mutex<HashMap<String, Instant>>,
}

impl Leases {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadlines: Mutex::new(HashMap::new()),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Creates a lease. Fails when one of that name already exists.
    pub fn create(&self, name: &str) -> bool {
        let mut deadlines = self.deadlines.lock();
        if deadlines.contains_key(name) {
            return false;
        }
        deadlines.insert(name.to_string(), Instant::now() + self.period);
        true
    }

    /// Pushes the lease's deadline out by one period. Returns `false` when
    /// the lease no longer exists (expired or cancelled).
    pub fn renew(&self, name: &str) -> bool {
        let mut deadlines = self.deadlines.lock();
        match deadlines.get_mut(name) {
            Some(deadline) => {
                *deadline = Instant::now() + self.period;
                true
            }
            None => false,
        }
    }

    /// Removes a lease without firing its expiry.
    pub fn cancel(&self, name: &str) -> bool {
        self.deadlines.lock().remove(name).is_some()
    }

    /// Removes and returns every lease due at `now`.
    pub fn expire_due(&self, now: Instant) -> Vec<String> {
        let mut deadlines = self.deadlines.lock();
        let due: Vec<String> = deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &due {
            deadlines.remove(name);
        }
        due
    }

    /// Removes and returns every lease, for shutdown.
    pub fn drain(&self) -> Vec<String> {
        self.deadlines.lock().drain().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.lock().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.deadlines.lock().contains_key(name)
    }
}
