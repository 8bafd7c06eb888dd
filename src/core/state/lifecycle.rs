// src/core/state/lifecycle.rs

//! Region lifecycle operations: open, close, close-all and quiesce. All
//! registry mutations go through the registry's exclusive lock; region IO
//! happens outside it.

use super::core::ServerState;
use crate::core::RegionServerError;
use crate::core::master::OutboundMessage;
use crate::core::region::{CompactionRequester, Region, RegionDescriptor};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

impl ServerState {
    /// Opens a region and installs it into `online`. Idempotent: a region
    /// already online (or retiring) is left untouched and nothing is
    /// reported. While the open is loading state, the region's progress
    /// callback keeps announcing `ReportProcessOpen` so the master does not
    /// reassign it.
    pub async fn open_region(
        self: &Arc<Self>,
        descriptor: RegionDescriptor,
    ) -> Result<(), RegionServerError> {
        let name = descriptor.region_name();
        if self.registry.get(&name, true).is_ok() {
            debug!("Region {} is already online; open is a no-op", name);
            return Ok(());
        }

        let wal = self.wal().await?;
        let (root, region_conf) = {
            let config = self.config.lock().await;
            (config.rootdir.clone(), config.region.clone())
        };

        let announce = descriptor.clone();
        let state = self.clone();
        let progress = move || {
            state
                .outbound
                .push(OutboundMessage::ReportProcessOpen(announce.clone()));
        };

        let region = Region::open(descriptor, &root, wal.clone(), region_conf, &progress).await?;

        // Let the compactor look at whatever store files the region came up with.
        self.compactor.request_compaction(region.clone());

        if self.registry.insert_online(region.clone()) {
            wal.ensure_sequence_at_least(region.flushed_sequence_id());
            self.outbound
                .push(OutboundMessage::ReportOpen(region.descriptor()));
            info!("Region {} is online", region.name());
        } else {
            debug!("Region {} appeared while opening; dropping duplicate", name);
        }
        Ok(())
    }

    /// Removes a region from `online` and closes it, optionally reporting
    /// the close to the master. Closing a region this server does not hold
    /// is a no-op.
    pub async fn close_region(
        &self,
        descriptor: &RegionDescriptor,
        report: bool,
    ) -> Result<(), RegionServerError> {
        let name = descriptor.region_name();
        let Some(region) = self.registry.remove_online(&name) else {
            debug!("Asked to close region {} which is not online", name);
            return Ok(());
        };
        region.close(false).await?;
        if report {
            self.outbound
                .push(OutboundMessage::ReportClose(region.descriptor()));
        }
        info!("Region {} closed (report={})", name, report);
        Ok(())
    }

    /// Drains and closes every region. With `abort` set, regions skip their
    /// final flush. Returns the descriptors of the regions that were closed.
    pub async fn close_all_regions(&self, abort: bool) -> Vec<RegionDescriptor> {
        let regions: Vec<Arc<Region>> = self.registry.drain_online();
        let mut closed = Vec::with_capacity(regions.len());
        for region in regions {
            match region.close(abort).await {
                Ok(()) => closed.push(region.descriptor()),
                Err(e) => error!("Error closing region {}: {}", region.name(), e),
            }
        }
        if !closed.is_empty() {
            info!("Closed {} regions (abort={})", closed.len(), abort);
        }
        closed
    }

    /// Closes every user region while retaining catalog regions, then marks
    /// the server quiesced and tells the master.
    pub async fn close_user_regions(&self) -> Result<(), RegionServerError> {
        let regions = self.registry.drain_user_regions();
        for region in regions {
            if let Err(e) = region.close(false).await {
                warn!(
                    "Error closing user region {} during quiesce: {}",
                    region.name(),
                    e
                );
            }
        }
        self.quiesced.store(true, Ordering::SeqCst);
        if self.registry.online_is_empty() {
            self.outbound.push(OutboundMessage::ReportExiting);
        } else {
            self.outbound.push(OutboundMessage::ReportQuiesced);
        }
        info!("User regions closed; server is quiesced");
        Ok(())
    }
}
