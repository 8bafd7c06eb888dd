// src/core/scanners.rs

//! The scanner registry: open cursors keyed by an opaque 64-bit id, each
//! guarded by a lease that expires when the client stops calling `next`.

use crate::core::RegionServerError;
use crate::core::leases::Leases;
use crate::core::metrics;
use crate::core::region::{RegionScanner, RowResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Random-id collision retries before giving up; with 64-bit ids this is
/// never expected to be exhausted.
const ID_ATTEMPTS: usize = 8;

pub struct ScannerRegistry {
    scanners: Mutex<HashMap<u64, Arc<Mutex<RegionScanner>>>>,
    leases: Leases,
}

impl ScannerRegistry {
    pub fn new(lease_period: Duration) -> Self {
        Self {
            scanners: Mutex::new(HashMap::new()),
            leases: Leases::new(lease_period),
        }
    }

    pub fn leases(&self) -> &Leases {
        &self.leases
    }

    /// Registers a cursor under a fresh random id and opens its lease. An id
    /// collision refuses the insert and retries with a new id.
    pub fn open(&self, scanner: RegionScanner) -> Result<u64, RegionServerError> {
        let scanner = Arc::new(Mutex::new(scanner));
        for _ in 0..ID_ATTEMPTS {
            let id = rand::random::<u64>();
            let mut scanners = self.scanners.lock();
            if scanners.contains_key(&id) {
                continue;
            }
            scanners.insert(id, scanner.clone());
            drop(scanners);
            if !self.leases.create(&lease_name(id)) {
                // A stale lease under this id means bookkeeping went wrong;
                // refuse rather than overwrite.
                self.scanners.lock().remove(&id);
                continue;
            }
            metrics::OPEN_SCANNERS.set(self.scanners.lock().len() as f64);
            debug!("Opened scanner {}", id);
            return Ok(id);
        }
        Err(RegionServerError::Internal(
            "could not allocate a scanner id".to_string(),
        ))
    }

    /// Advances the scanner and renews its lease.
    pub fn next(&self, id: u64) -> Result<Option<RowResult>, RegionServerError> {
        let scanner = self
            .scanners
            .lock()
            .get(&id)
            .cloned()
            .ok_or(RegionServerError::UnknownScanner(id))?;
        if !self.leases.renew(&lease_name(id)) {
            return Err(RegionServerError::UnknownScanner(id));
        }
        let mut scanner = scanner.lock();
        Ok(scanner.next_row())
    }

    /// Closes a scanner and cancels its lease.
    pub fn close(&self, id: u64) -> Result<(), RegionServerError> {
        let removed = self.scanners.lock().remove(&id);
        self.leases.cancel(&lease_name(id));
        metrics::OPEN_SCANNERS.set(self.scanners.lock().len() as f64);
        match removed {
            Some(_) => Ok(()),
            None => Err(RegionServerError::UnknownScanner(id)),
        }
    }

    /// Drops a scanner whose lease has expired.
    pub fn expire(&self, lease: &str) {
        let Some(id) = parse_lease_name(lease) else {
            return;
        };
        if self.scanners.lock().remove(&id).is_some() {
            metrics::EXPIRED_SCANNER_LEASES_TOTAL.inc();
            metrics::OPEN_SCANNERS.set(self.scanners.lock().len() as f64);
            warn!("Scanner {} expired without being closed", id);
        }
    }

    /// Closes every scanner and cancels every lease, for shutdown.
    pub fn close_all(&self) {
        let count = {
            let mut scanners = self.scanners.lock();
            let count = scanners.len();
            scanners.clear();
            count
        };
        self.leases.drain();
        metrics::OPEN_SCANNERS.set(0.0);
        if count > 0 {
            debug!("Closed {} scanners at shutdown", count);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.scanners.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.scanners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.lock().is_empty()
    }
}

fn lease_name(id: u64) -> String {
    format!("scanner-{id}")
}

fn parse_lease_name(name: &str) -> Option<u64> {
    name.strip_prefix("scanner-")?.parse().ok()
}
