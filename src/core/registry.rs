// src/core/registry.rs

//! The region registry: which regions this server currently serves.
//!
//! Two maps under a single read-write lock. `online` holds regions eligible
//! to serve requests; `retiring` holds regions that have begun closing but
//! may still be needed by in-flight scanners. A region is in at most one of
//! the two; transitions are none → online → retiring → none. Region IO is
//! never performed while holding the lock.

use crate::core::RegionServerError;
use crate::core::metrics;
use crate::core::region::Region;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct Maps {
    online: BTreeMap<String, Arc<Region>>,
    retiring: HashMap<String, Arc<Region>>,
}

#[derive(Default)]
pub struct RegionRegistry {
    inner: RwLock<Maps>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a region into `online`. Returns `false` (and leaves the
    /// registry untouched) when a region of that name is already present,
    /// making region opens idempotent.
    pub fn insert_online(&self, region: Arc<Region>) -> bool {
        let mut maps = self.inner.write();
        let name = region.name().to_string();
        if maps.online.contains_key(&name) || maps.retiring.contains_key(&name) {
            return false;
        }
        maps.online.insert(name, region);
        metrics::ONLINE_REGIONS.set(maps.online.len() as f64);
        true
    }

    /// Removes a region from `online`; the caller closes it outside the lock.
    pub fn remove_online(&self, name: &str) -> Option<Arc<Region>> {
        let mut maps = self.inner.write();
        let region = maps.online.remove(name);
        metrics::ONLINE_REGIONS.set(maps.online.len() as f64);
        region
    }

    /// Moves a region from `online` to `retiring` so pending scanners can
    /// still reach it while it closes.
    pub fn retire(&self, name: &str) -> bool {
        let mut maps = self.inner.write();
        if let Some(region) = maps.online.remove(name) {
            maps.retiring.insert(name.to_string(), region);
            metrics::ONLINE_REGIONS.set(maps.online.len() as f64);
            true
        } else {
            false
        }
    }

    /// Drops a fully closed region from `retiring`.
    pub fn drop_retired(&self, name: &str) {
        self.inner.write().retiring.remove(name);
    }

    /// Looks a region up for serving. `retiring` is consulted only when
    /// requested (scanner paths); absence is a not-serving-region error.
    pub fn get(
        &self,
        name: &str,
        check_retiring: bool,
    ) -> Result<Arc<Region>, RegionServerError> {
        let maps = self.inner.read();
        if let Some(region) = maps.online.get(name) {
            return Ok(region.clone());
        }
        if check_retiring && let Some(region) = maps.retiring.get(name) {
            return Ok(region.clone());
        }
        Err(RegionServerError::NotServingRegion(name.to_string()))
    }

    pub fn online_count(&self) -> usize {
        self.inner.read().online.len()
    }

    pub fn online_is_empty(&self) -> bool {
        self.inner.read().online.is_empty()
    }

    /// The online regions in name order.
    pub fn online_snapshot(&self) -> Vec<Arc<Region>> {
        self.inner.read().online.values().cloned().collect()
    }

    /// Drains every online region for closing; the registry ends empty.
    pub fn drain_online(&self) -> Vec<Arc<Region>> {
        let mut maps = self.inner.write();
        let drained: Vec<Arc<Region>> = std::mem::take(&mut maps.online).into_values().collect();
        metrics::ONLINE_REGIONS.set(0.0);
        drained
    }

    /// Drains every non-catalog region, retaining root and meta regions.
    pub fn drain_user_regions(&self) -> Vec<Arc<Region>> {
        let mut maps = self.inner.write();
        let (catalog, user): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut maps.online)
            .into_iter()
            .partition(|(_, region)| region.is_catalog());
        maps.online = catalog;
        metrics::ONLINE_REGIONS.set(maps.online.len() as f64);
        user.into_values().collect()
    }
}
