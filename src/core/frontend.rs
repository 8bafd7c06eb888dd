// src/core/frontend.rs

//! The request front end: the stateless methods behind the client RPC
//! surface. Every method checks the server is open, counts the request,
//! resolves its region, and funnels IO failures through the filesystem
//! watchdog before re-surfacing them. Writes pass global memory admission
//! first.

use crate::core::RegionServerError;
use crate::core::fs;
use crate::core::metrics;
use crate::core::now_ms;
use crate::core::protocol::{PROTOCOL_VERSION, REGION_SERVER_PROTOCOL, Request, Response};
use crate::core::region::{
    BatchUpdate, CellEntry, ColumnFilter, FlushRequester, Region, RegionDescriptor, RegionScanner,
    RowResult, ScanFilter,
};
use crate::core::state::ServerState;
use crate::core::tasks::flusher::reclaim_memtable_memory;
use bytes::Bytes;
use std::sync::Arc;

/// The default number of cell versions a plain get returns.
const DEFAULT_VERSIONS: u32 = 1;

#[derive(Clone)]
pub struct FrontEnd {
    state: Arc<ServerState>,
}

impl FrontEnd {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Entry checks shared by every method.
    fn before(&self) -> Result<(), RegionServerError> {
        self.state.check_open()?;
        self.state.stats.increment_requests();
        metrics::REQUESTS_TOTAL.inc();
        Ok(())
    }

    /// Probes the filesystem on IO-class failures before re-surfacing them,
    /// unwrapping remote errors to their IO cause.
    async fn surface<T>(
        &self,
        result: Result<T, RegionServerError>,
    ) -> Result<T, RegionServerError> {
        match result {
            Err(e) if e.is_io() => {
                fs::check_file_system(&self.state).await;
                Err(e.unwrap_remote())
            }
            other => other,
        }
    }

    fn region(&self, name: &str) -> Result<Arc<Region>, RegionServerError> {
        self.state.registry.get(name, false)
    }

    pub async fn get_region_info(
        &self,
        region: &str,
    ) -> Result<RegionDescriptor, RegionServerError> {
        self.before()?;
        Ok(self.region(region)?.descriptor())
    }

    pub async fn get(
        &self,
        region: &str,
        row: &Bytes,
        column: &str,
        versions: Option<u32>,
        timestamp: Option<u64>,
    ) -> Result<Vec<CellEntry>, RegionServerError> {
        self.before()?;
        let region = self.region(region)?;
        Ok(region.get(
            row,
            column,
            versions.unwrap_or(DEFAULT_VERSIONS),
            timestamp.unwrap_or(u64::MAX),
        ))
    }

    pub async fn get_row(
        &self,
        region: &str,
        row: &Bytes,
        timestamp: Option<u64>,
    ) -> Result<Option<RowResult>, RegionServerError> {
        self.before()?;
        let region = self.region(region)?;
        Ok(region.get_row(row, timestamp.unwrap_or(u64::MAX)))
    }

    pub async fn get_closest_row_before(
        &self,
        region: &str,
        row: &Bytes,
    ) -> Result<Option<RowResult>, RegionServerError> {
        self.before()?;
        let region = self.region(region)?;
        Ok(region.get_closest_row_before(row))
    }

    pub async fn batch_update(
        &self,
        region: &str,
        timestamp: Option<u64>,
        update: &BatchUpdate,
    ) -> Result<(), RegionServerError> {
        self.before()?;
        let admission = reclaim_memtable_memory(&self.state).await;
        self.surface(admission).await?;
        let region = self.region(region)?;
        let result = region
            .batch_update(timestamp.unwrap_or_else(now_ms), update)
            .await;
        self.surface(result).await?;
        if region.should_flush() {
            self.state.flusher.request_flush(region);
        }
        Ok(())
    }

    pub async fn delete_all(
        &self,
        region: &str,
        row: &Bytes,
        column: Option<&str>,
        timestamp: u64,
    ) -> Result<(), RegionServerError> {
        self.before()?;
        let admission = reclaim_memtable_memory(&self.state).await;
        self.surface(admission).await?;
        let region = self.region(region)?;
        let result = region.delete_all(row, column, timestamp).await;
        self.surface(result).await
    }

    pub async fn delete_family(
        &self,
        region: &str,
        row: &Bytes,
        family: &str,
        timestamp: u64,
    ) -> Result<(), RegionServerError> {
        self.before()?;
        let admission = reclaim_memtable_memory(&self.state).await;
        self.surface(admission).await?;
        let region = self.region(region)?;
        let result = region.delete_family(row, family, timestamp).await;
        self.surface(result).await
    }

    pub async fn open_scanner(
        &self,
        region: &str,
        columns: &[String],
        first_row: Bytes,
        timestamp: u64,
        filter: Option<ScanFilter>,
    ) -> Result<u64, RegionServerError> {
        self.before()?;
        let region = self.region(region)?;
        let scanner = RegionScanner::new(
            region,
            ColumnFilter::new(columns),
            first_row,
            timestamp,
            filter,
        );
        self.state.scanners.open(scanner)
    }

    pub async fn next(&self, scanner_id: u64) -> Result<Option<RowResult>, RegionServerError> {
        self.before()?;
        self.state.scanners.next(scanner_id)
    }

    pub async fn close_scanner(&self, scanner_id: u64) -> Result<(), RegionServerError> {
        self.before()?;
        self.state.scanners.close(scanner_id)
    }

    pub async fn get_protocol_version(
        &self,
        protocol: &str,
        _client_version: u64,
    ) -> Result<u64, RegionServerError> {
        self.before()?;
        if protocol == REGION_SERVER_PROTOCOL {
            Ok(PROTOCOL_VERSION)
        } else {
            Err(RegionServerError::InvalidRequest(format!(
                "unknown protocol '{protocol}'"
            )))
        }
    }

    /// Maps a decoded request to its method and the result to a response.
    pub async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::GetRegionInfo { region } => match self.get_region_info(&region).await {
                Ok(descriptor) => Response::RegionInfo(descriptor),
                Err(e) => Response::from_error(&e),
            },
            Request::Get {
                region,
                row,
                column,
                versions,
                timestamp,
            } => match self.get(&region, &row, &column, versions, timestamp).await {
                Ok(cells) => Response::Cells(cells),
                Err(e) => Response::from_error(&e),
            },
            Request::GetRow {
                region,
                row,
                timestamp,
            } => match self.get_row(&region, &row, timestamp).await {
                Ok(result) => Response::Row(result),
                Err(e) => Response::from_error(&e),
            },
            Request::GetClosestRowBefore { region, row } => {
                match self.get_closest_row_before(&region, &row).await {
                    Ok(result) => Response::Row(result),
                    Err(e) => Response::from_error(&e),
                }
            }
            Request::BatchUpdate {
                region,
                timestamp,
                update,
            } => match self.batch_update(&region, timestamp, &update).await {
                Ok(()) => Response::Done,
                Err(e) => Response::from_error(&e),
            },
            Request::DeleteAll {
                region,
                row,
                column,
                timestamp,
            } => match self
                .delete_all(&region, &row, column.as_deref(), timestamp)
                .await
            {
                Ok(()) => Response::Done,
                Err(e) => Response::from_error(&e),
            },
            Request::DeleteFamily {
                region,
                row,
                family,
                timestamp,
            } => match self.delete_family(&region, &row, &family, timestamp).await {
                Ok(()) => Response::Done,
                Err(e) => Response::from_error(&e),
            },
            Request::OpenScanner {
                region,
                columns,
                first_row,
                timestamp,
                filter,
            } => match self
                .open_scanner(&region, &columns, first_row, timestamp, filter)
                .await
            {
                Ok(scanner_id) => Response::ScannerOpened { scanner_id },
                Err(e) => Response::from_error(&e),
            },
            Request::Next { scanner_id } => match self.next(scanner_id).await {
                Ok(result) => Response::Row(result),
                Err(e) => Response::from_error(&e),
            },
            Request::CloseScanner { scanner_id } => match self.close_scanner(scanner_id).await {
                Ok(()) => Response::Done,
                Err(e) => Response::from_error(&e),
            },
            Request::GetProtocolVersion {
                protocol,
                client_version,
            } => match self.get_protocol_version(&protocol, client_version).await {
                Ok(version) => Response::ProtocolVersion(version),
                Err(e) => Response::from_error(&e),
            },
        }
    }
}
