// src/core/region/mod.rs

//! Region storage: one contiguous key range of a table, with its memtable,
//! per-family on-disk stores and write path through the shared WAL.

pub mod descriptor;
pub mod memtable;
pub mod scanner;
pub mod store;

pub use descriptor::{RegionDescriptor, TableSchema};
pub use memtable::{CellKey, CellValue, Memtable, row_successor};
pub use scanner::{ColumnFilter, RegionScanner, ScanFilter};
pub use store::{Store, StoreFile, merge_and_prune};

use crate::core::wal::{Wal, WalEdit, read_records};
use crate::core::{RegionServerError, metrics, now_ms};
use crate::config::RegionConfig;
use bytes::Bytes;
use crc::{CRC_32_ISCSI, Crc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const RECOVERED_EDITS_FILE: &str = "recovered.edits";
const REPLAY_PROGRESS_STRIDE: usize = 1000;

/// One version of one cell, as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellEntry {
    pub value: Bytes,
    pub timestamp: u64,
}

/// One row as returned by row gets and scanners: the newest live version of
/// each selected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowResult {
    pub row: Bytes,
    pub cells: BTreeMap<String, CellEntry>,
}

/// A batched mutation against a single row, applied atomically at one
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub row: Bytes,
    pub ops: Vec<BatchOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Put { column: String, value: Bytes },
    Delete { column: String },
}

/// Capability handle through which a region (or the admission path) asks the
/// flusher to schedule a flush.
pub trait FlushRequester: Send + Sync {
    fn request_flush(&self, region: Arc<Region>);
}

/// Capability handle through which the flusher hands a region to the
/// compactor.
pub trait CompactionRequester: Send + Sync {
    fn request_compaction(&self, region: Arc<Region>);
}

/// Callbacks a region fires while making itself unavailable during a split,
/// so the registry can keep it reachable for in-flight scanners.
pub trait RegionUnavailableListener: Send + Sync {
    fn closing(&self, region_name: &str);
    fn closed(&self, region_name: &str);
}

/// The directory a region's stores live under: `<root>/<table>/<encoded name>`.
pub fn region_dir(root: &Path, descriptor: &RegionDescriptor) -> PathBuf {
    let encoded = format!(
        "{:08x}",
        CASTAGNOLI.checksum(descriptor.region_name().as_bytes())
    );
    root.join(&descriptor.table.name).join(encoded)
}

/// A region: the unit of assignment, hosting reads and writes for one key
/// range. Mutating maintenance (flush, compaction, split, close) is
/// serialized by an internal work lock; plain reads and writes are not.
pub struct Region {
    descriptor: RwLock<RegionDescriptor>,
    name: String,
    dir: PathBuf,
    wal: Arc<Wal>,
    conf: RegionConfig,
    memtable: RwLock<Memtable>,
    /// Memtable snapshot held while a flush writes it out; reads consult it
    /// so a flush never hides data.
    snapshot: Mutex<Option<Memtable>>,
    stores: RwLock<BTreeMap<String, Store>>,
    /// Serializes flush/compact/split/close against each other.
    work_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    /// Highest WAL sequence id applied to this region.
    max_applied_sequence: AtomicU64,
    last_flush: Mutex<Instant>,
}

impl Region {
    /// Opens a region: loads its store files, replays any recovered edits
    /// left for it, and advances the WAL sequence counter past everything
    /// already durable. `progress` is invoked periodically so the caller can
    /// tell the master the open is still moving.
    pub async fn open(
        descriptor: RegionDescriptor,
        root: &Path,
        wal: Arc<Wal>,
        conf: RegionConfig,
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<Arc<Region>, RegionServerError> {
        let name = descriptor.region_name();
        let dir = region_dir(root, &descriptor);
        tokio::fs::create_dir_all(&dir).await?;

        let mut stores = BTreeMap::new();
        for family in &descriptor.table.families {
            let store = Store::open(family, &dir, descriptor.table.max_versions).await?;
            progress();
            stores.insert(family.clone(), store);
        }
        let flushed = stores
            .values()
            .map(|s| s.max_sequence_id())
            .min()
            .unwrap_or(0);

        let region = Arc::new(Region {
            name: name.clone(),
            dir: dir.clone(),
            wal,
            conf,
            memtable: RwLock::new(Memtable::new()),
            snapshot: Mutex::new(None),
            stores: RwLock::new(stores),
            work_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            max_applied_sequence: AtomicU64::new(flushed),
            last_flush: Mutex::new(Instant::now()),
            descriptor: RwLock::new(descriptor),
        });

        let recovered = dir.join(RECOVERED_EDITS_FILE);
        if tokio::fs::try_exists(&recovered).await? {
            region.replay_recovered_edits(&recovered, flushed, progress).await?;
        }

        region
            .wal
            .ensure_sequence_at_least(region.max_applied_sequence.load(Ordering::SeqCst));
        info!("Opened region {} at {}", name, dir.display());
        Ok(region)
    }

    async fn replay_recovered_edits(
        &self,
        path: &Path,
        flushed: u64,
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<(), RegionServerError> {
        let records = read_records(path).await?;
        let total = records.len();
        let mut applied = 0usize;
        {
            let mut memtable = self.memtable.write();
            for record in records {
                if record.sequence <= flushed || record.region != self.name {
                    continue;
                }
                let value = match record.value {
                    Some(v) => CellValue::Put(Bytes::from(v)),
                    None => CellValue::Delete,
                };
                memtable.insert(
                    CellKey::new(Bytes::from(record.row), record.column, record.timestamp),
                    value,
                );
                self.max_applied_sequence
                    .fetch_max(record.sequence, Ordering::SeqCst);
                applied += 1;
                if applied % REPLAY_PROGRESS_STRIDE == 0 {
                    progress();
                }
            }
        }
        tokio::fs::remove_file(path).await?;
        info!(
            "Replayed {} of {} recovered edits into region {}",
            applied, total, self.name
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> RegionDescriptor {
        self.descriptor.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_catalog(&self) -> bool {
        self.descriptor.read().table.is_catalog()
    }

    /// Live bytes in the memtable plus any flush snapshot still in memory.
    pub fn memtable_size(&self) -> usize {
        let snap = self.snapshot.lock().as_ref().map(|m| m.size()).unwrap_or(0);
        self.memtable.read().size() + snap
    }

    /// Whether the memtable has grown past the flush threshold.
    pub fn should_flush(&self) -> bool {
        self.memtable.read().size() > self.conf.memtable_flush_size
    }

    pub fn last_flush_instant(&self) -> Instant {
        *self.last_flush.lock()
    }

    /// Highest sequence id durable across every family's store files.
    pub fn flushed_sequence_id(&self) -> u64 {
        self.stores
            .read()
            .values()
            .map(|s| s.max_sequence_id())
            .min()
            .unwrap_or(0)
    }

    // --- Write path ---

    /// Applies a batch of puts and deletes to one row at a single timestamp.
    /// Edits reach the WAL before the memtable.
    pub async fn batch_update(
        &self,
        timestamp: u64,
        update: &BatchUpdate,
    ) -> Result<(), RegionServerError> {
        if self.is_closed() {
            return Err(RegionServerError::NotServingRegion(self.name.clone()));
        }
        {
            let descriptor = self.descriptor.read();
            if !descriptor.contains_row(&update.row) {
                return Err(RegionServerError::InvalidRequest(format!(
                    "row does not belong to region {}",
                    self.name
                )));
            }
            for op in &update.ops {
                let column = match op {
                    BatchOp::Put { column, .. } | BatchOp::Delete { column } => column,
                };
                let family = column.split(':').next().unwrap_or("");
                if !descriptor.table.families.iter().any(|f| f == family) {
                    return Err(RegionServerError::InvalidRequest(format!(
                        "unknown column family '{family}'"
                    )));
                }
            }
        }

        let edits: Vec<WalEdit> = update
            .ops
            .iter()
            .map(|op| match op {
                BatchOp::Put { column, value } => WalEdit {
                    row: update.row.clone(),
                    column: column.clone(),
                    timestamp,
                    value: Some(value.clone()),
                },
                BatchOp::Delete { column } => WalEdit {
                    row: update.row.clone(),
                    column: column.clone(),
                    timestamp,
                    value: None,
                },
            })
            .collect();
        self.apply_edits(edits).await
    }

    /// Writes tombstones for every live version (at or below `timestamp`) of
    /// the given column, or of every column of the row when none is given.
    pub async fn delete_all(
        &self,
        row: &Bytes,
        column: Option<&str>,
        timestamp: u64,
    ) -> Result<(), RegionServerError> {
        if self.is_closed() {
            return Err(RegionServerError::NotServingRegion(self.name.clone()));
        }
        let columns = self.columns_of_row(row, |c| match column {
            Some(wanted) => c == wanted,
            None => true,
        });
        let edits: Vec<WalEdit> = columns
            .into_iter()
            .map(|column| WalEdit {
                row: row.clone(),
                column,
                timestamp,
                value: None,
            })
            .collect();
        if edits.is_empty() {
            return Ok(());
        }
        self.apply_edits(edits).await
    }

    /// Writes tombstones for every column of one family of a row.
    pub async fn delete_family(
        &self,
        row: &Bytes,
        family: &str,
        timestamp: u64,
    ) -> Result<(), RegionServerError> {
        if self.is_closed() {
            return Err(RegionServerError::NotServingRegion(self.name.clone()));
        }
        let prefix = format!("{family}:");
        let columns = self.columns_of_row(row, |c| c.starts_with(&prefix));
        let edits: Vec<WalEdit> = columns
            .into_iter()
            .map(|column| WalEdit {
                row: row.clone(),
                column,
                timestamp,
                value: None,
            })
            .collect();
        if edits.is_empty() {
            return Ok(());
        }
        self.apply_edits(edits).await
    }

    async fn apply_edits(&self, edits: Vec<WalEdit>) -> Result<(), RegionServerError> {
        let last = self.wal.append(&self.name, &edits).await?;
        let mut memtable = self.memtable.write();
        for edit in edits {
            let value = match edit.value {
                Some(v) => CellValue::Put(v),
                None => CellValue::Delete,
            };
            memtable.insert(CellKey::new(edit.row, edit.column, edit.timestamp), value);
        }
        self.max_applied_sequence.fetch_max(last, Ordering::SeqCst);
        Ok(())
    }

    // --- Read path ---

    /// Up to `versions` live versions of one cell, newest first, at or below
    /// `timestamp`.
    pub fn get(
        &self,
        row: &Bytes,
        column: &str,
        versions: u32,
        timestamp: u64,
    ) -> Vec<CellEntry> {
        let merged = self.merged_row(row);
        let filter = ColumnFilter::exact(column);
        let assembled = assemble_row(&merged, timestamp, versions, &filter);
        assembled.into_values().next().unwrap_or_default()
    }

    /// The newest live version of every column of a row at or below
    /// `timestamp`, or `None` if the row has no live cells.
    pub fn get_row(&self, row: &Bytes, timestamp: u64) -> Option<RowResult> {
        let merged = self.merged_row(row);
        let assembled = assemble_row(&merged, timestamp, 1, &ColumnFilter::all());
        row_result(row.clone(), assembled)
    }

    /// The nearest row at or before `row` with any live cell.
    pub fn get_closest_row_before(&self, row: &Bytes) -> Option<RowResult> {
        let mut inclusive_upper = row.clone();
        let mut inclusive = true;
        loop {
            let candidate = self.prev_row(&inclusive_upper, inclusive)?;
            let merged = self.merged_row(&candidate);
            let assembled = assemble_row(&merged, u64::MAX, 1, &ColumnFilter::all());
            if let Some(result) = row_result(candidate.clone(), assembled) {
                return Some(result);
            }
            inclusive_upper = candidate;
            inclusive = false;
        }
    }

    /// The first row at or after `start` with a live cell passing the column
    /// filter, used by scanners.
    pub fn next_row_at_or_after(
        &self,
        start: &Bytes,
        columns: &ColumnFilter,
        timestamp: u64,
    ) -> Option<RowResult> {
        let mut cursor = start.clone();
        loop {
            let candidate = self.next_row(&cursor)?;
            let merged = self.merged_row(&candidate);
            let assembled = assemble_row(&merged, timestamp, 1, columns);
            if let Some(result) = row_result(candidate.clone(), assembled) {
                return Some(result);
            }
            cursor = row_successor(&candidate);
        }
    }

    /// Collects every cell of one row across stores, snapshot and memtable,
    /// newer sources shadowing older ones at identical keys.
    fn merged_row(&self, row: &Bytes) -> BTreeMap<CellKey, CellValue> {
        let mut merged = BTreeMap::new();
        let store_sources: Vec<Arc<BTreeMap<CellKey, CellValue>>> = {
            let stores = self.stores.read();
            stores.values().flat_map(|s| s.cell_sources()).collect()
        };
        for source in &store_sources {
            for (k, v) in map_row_range(source, row) {
                merged.insert(k.clone(), v.clone());
            }
        }
        if let Some(snapshot) = self.snapshot.lock().as_ref() {
            for (k, v) in snapshot.row_range(row) {
                merged.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in self.memtable.read().row_range(row) {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    fn next_row(&self, start: &Bytes) -> Option<Bytes> {
        let mut best: Option<Bytes> = None;
        let consider = |best: &mut Option<Bytes>, candidate: Option<Bytes>| {
            if let Some(row) = candidate {
                match best {
                    Some(current) if *current <= row => {}
                    _ => *best = Some(row),
                }
            }
        };
        {
            let stores = self.stores.read();
            for source in stores.values().flat_map(|s| s.cell_sources()) {
                consider(&mut best, map_next_row(&source, start));
            }
        }
        if let Some(snapshot) = self.snapshot.lock().as_ref() {
            consider(&mut best, snapshot.next_row_at_or_after(start));
        }
        consider(&mut best, self.memtable.read().next_row_at_or_after(start));
        best
    }

    fn prev_row(&self, row: &Bytes, inclusive: bool) -> Option<Bytes> {
        let mut best: Option<Bytes> = None;
        let consider = |best: &mut Option<Bytes>, candidate: Option<Bytes>| {
            if let Some(r) = candidate {
                match best {
                    Some(current) if *current >= r => {}
                    _ => *best = Some(r),
                }
            }
        };
        {
            let stores = self.stores.read();
            for source in stores.values().flat_map(|s| s.cell_sources()) {
                consider(&mut best, map_prev_row(&source, row, inclusive));
            }
        }
        if let Some(snapshot) = self.snapshot.lock().as_ref() {
            consider(
                &mut best,
                if inclusive {
                    snapshot.prev_row_at_or_before(row)
                } else {
                    map_prev_row(snapshot.cells(), row, false)
                },
            );
        }
        {
            let memtable = self.memtable.read();
            consider(
                &mut best,
                if inclusive {
                    memtable.prev_row_at_or_before(row)
                } else {
                    map_prev_row(memtable.cells(), row, false)
                },
            );
        }
        best
    }

    /// Distinct live columns of a row matching `select`.
    fn columns_of_row(&self, row: &Bytes, select: impl Fn(&str) -> bool) -> Vec<String> {
        let merged = self.merged_row(row);
        let assembled = assemble_row(&merged, u64::MAX, 1, &ColumnFilter::all());
        assembled
            .into_iter()
            .filter(|(column, entries)| !entries.is_empty() && select(column))
            .map(|(column, _)| column)
            .collect()
    }

    // --- Maintenance path ---

    /// Flushes the memtable into per-family store files. Returns whether a
    /// compaction is now warranted. A failure after the memtable snapshot was
    /// taken surfaces as `DroppedSnapshot`: the data only exists in the WAL.
    pub async fn flush_cache(&self) -> Result<bool, RegionServerError> {
        let _guard = self.work_lock.lock().await;
        self.flush_locked().await
    }

    async fn flush_locked(&self) -> Result<bool, RegionServerError> {
        let snapshot = {
            let mut memtable = self.memtable.write();
            if memtable.is_empty() {
                return Ok(self.needs_compaction());
            }
            let fresh = memtable.take();
            let mut slot = self.snapshot.lock();
            match slot.take() {
                // A previous failed flush left a snapshot; fold the fresh
                // cells on top so nothing is lost.
                Some(mut stale) => {
                    for (k, v) in fresh.cells() {
                        stale.insert(k.clone(), v.clone());
                    }
                    *slot = Some(stale);
                }
                None => *slot = Some(fresh),
            }
            slot.as_ref().expect("snapshot just installed").cells().clone()
        };

        let flush_sequence = self.max_applied_sequence.load(Ordering::SeqCst);

        // Partition the snapshot by family.
        let mut by_family: BTreeMap<String, BTreeMap<CellKey, CellValue>> = BTreeMap::new();
        for (k, v) in snapshot {
            by_family
                .entry(k.family().to_string())
                .or_default()
                .insert(k, v);
        }

        for (family, cells) in by_family {
            let (path, file_id) = {
                let mut stores = self.stores.write();
                match stores.get_mut(&family) {
                    Some(store) => store.next_flush_target(),
                    None => {
                        warn!(
                            "Dropping {} cells of unknown family '{}' in region {}",
                            cells.len(),
                            family,
                            self.name
                        );
                        continue;
                    }
                }
            };
            let file = StoreFile::write(path, file_id, flush_sequence, cells)
                .await
                .map_err(|e| RegionServerError::DroppedSnapshot(e.to_string()))?;
            let mut stores = self.stores.write();
            if let Some(store) = stores.get_mut(&family) {
                store.add_file(file);
            }
        }

        *self.snapshot.lock() = None;
        *self.last_flush.lock() = Instant::now();
        metrics::MEMTABLE_FLUSHES_TOTAL.inc();
        debug!(
            "Flushed region {} through sequence {}",
            self.name, flush_sequence
        );
        Ok(self.needs_compaction())
    }

    fn needs_compaction(&self) -> bool {
        self.stores
            .read()
            .values()
            .any(|s| s.file_count() >= self.conf.compaction_threshold)
    }

    /// Compacts any family holding enough store files. Returns whether the
    /// region has grown past the split threshold.
    pub async fn compact_stores(&self) -> Result<bool, RegionServerError> {
        let _guard = self.work_lock.lock().await;
        if self.is_closed() {
            return Ok(false);
        }
        let families: Vec<String> = self.stores.read().keys().cloned().collect();
        for family in families {
            let plan = {
                let mut stores = self.stores.write();
                match stores.get_mut(&family) {
                    Some(store) if store.file_count() >= self.conf.compaction_threshold => {
                        store.plan_compaction()
                    }
                    _ => None,
                }
            };
            let Some(plan) = plan else { continue };

            let compacted = StoreFile::write(
                plan.target_path.clone(),
                plan.target_id,
                plan.max_sequence_id,
                plan.merged,
            )
            .await?;
            {
                let mut stores = self.stores.write();
                if let Some(store) = stores.get_mut(&family) {
                    store.complete_compaction(&plan.replaced, compacted);
                }
            }
            for old in &plan.replaced {
                if let Err(e) = tokio::fs::remove_file(&old.path).await {
                    warn!(
                        "Could not remove compacted store file {}: {}",
                        old.path.display(),
                        e
                    );
                }
            }
            metrics::COMPACTIONS_TOTAL.inc();
            info!("Compacted family '{}' of region {}", family, self.name);
        }
        Ok(self.split_due())
    }

    fn split_due(&self) -> bool {
        if self.descriptor.read().table.is_root() {
            return false;
        }
        self.stores
            .read()
            .values()
            .any(|s| s.total_bytes() > self.conf.max_store_size)
    }

    /// Splits this region into two children covering halves of its key
    /// range, or returns `None` when no usable midpoint exists. The parent is
    /// closed through the unavailability listener; the children are written
    /// to disk but not opened, the master assigns them later.
    pub async fn split(
        &self,
        root: &Path,
        listener: &dyn RegionUnavailableListener,
    ) -> Result<Option<(RegionDescriptor, RegionDescriptor)>, RegionServerError> {
        let _guard = self.work_lock.lock().await;
        if self.is_closed() {
            return Ok(None);
        }

        let (parent, mid) = {
            let descriptor = self.descriptor.read();
            let stores = self.stores.read();
            let mid = stores
                .values()
                .max_by_key(|s| s.total_bytes())
                .and_then(|s| s.middle_row());
            (descriptor.clone(), mid)
        };
        let Some(mid) = mid else {
            return Ok(None);
        };
        if (!parent.start_key.is_empty() && mid <= parent.start_key)
            || (!parent.end_key.is_empty() && mid >= parent.end_key)
        {
            return Ok(None);
        }

        listener.closing(&self.name);
        let close_result = self.close_locked(false).await;
        if let Err(e) = close_result {
            listener.closed(&self.name);
            return Err(e);
        }

        let region_id = now_ms();
        let child_a = RegionDescriptor::new(
            parent.table.clone(),
            parent.start_key.clone(),
            mid.clone(),
            region_id,
        );
        let child_b = RegionDescriptor::new(
            parent.table.clone(),
            mid.clone(),
            parent.end_key.clone(),
            region_id,
        );

        let flushed = self.flushed_sequence_id();
        let result = self
            .write_children(root, &child_a, &child_b, &mid, flushed)
            .await;
        listener.closed(&self.name);
        result?;

        {
            let mut descriptor = self.descriptor.write();
            descriptor.offline = true;
            descriptor.split = true;
        }
        metrics::REGION_SPLITS_TOTAL.inc();
        info!(
            "Split region {} at mid key ({} bytes) into {} and {}",
            self.name,
            mid.len(),
            child_a.region_name(),
            child_b.region_name()
        );
        Ok(Some((child_a, child_b)))
    }

    async fn write_children(
        &self,
        root: &Path,
        child_a: &RegionDescriptor,
        child_b: &RegionDescriptor,
        mid: &Bytes,
        flushed: u64,
    ) -> Result<(), RegionServerError> {
        let families: Vec<String> = self.stores.read().keys().cloned().collect();
        for family in families {
            let merged = {
                let stores = self.stores.read();
                let store = stores.get(&family).expect("family present");
                merge_and_prune(
                    &store.cell_sources(),
                    self.descriptor.read().table.max_versions,
                )
            };
            let mut lower: BTreeMap<CellKey, CellValue> = BTreeMap::new();
            let mut upper: BTreeMap<CellKey, CellValue> = BTreeMap::new();
            for (k, v) in merged {
                if k.row < *mid {
                    lower.insert(k, v);
                } else {
                    upper.insert(k, v);
                }
            }
            for (child, cells) in [(child_a, lower), (child_b, upper)] {
                let dir = region_dir(root, child).join(&family);
                tokio::fs::create_dir_all(&dir).await?;
                if cells.is_empty() {
                    continue;
                }
                StoreFile::write(dir.join("0.store"), 0, flushed, cells).await?;
            }
        }
        Ok(())
    }

    /// Closes the region. Unless aborting, the memtable is flushed first so
    /// nothing is left only in the WAL.
    pub async fn close(&self, abort: bool) -> Result<(), RegionServerError> {
        let _guard = self.work_lock.lock().await;
        self.close_locked(abort).await
    }

    async fn close_locked(&self, abort: bool) -> Result<(), RegionServerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !abort {
            // Re-open for the duration of the final flush.
            self.closed.store(false, Ordering::SeqCst);
            let result = self.flush_locked().await;
            self.closed.store(true, Ordering::SeqCst);
            result?;
        }
        info!("Closed region {} (abort={})", self.name, abort);
        Ok(())
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

// --- Row assembly helpers shared by every read ---

fn map_row_range<'a>(
    map: &'a BTreeMap<CellKey, CellValue>,
    row: &Bytes,
) -> impl Iterator<Item = (&'a CellKey, &'a CellValue)> {
    let lower = CellKey::first_for_row(row.clone());
    let upper = CellKey::first_for_row(row_successor(row));
    map.range((Bound::Included(lower), Bound::Excluded(upper)))
}

fn map_next_row(map: &BTreeMap<CellKey, CellValue>, start: &Bytes) -> Option<Bytes> {
    let lower = CellKey::first_for_row(start.clone());
    map.range((Bound::Included(lower), Bound::Unbounded))
        .next()
        .map(|(k, _)| k.row.clone())
}

fn map_prev_row(
    map: &BTreeMap<CellKey, CellValue>,
    row: &Bytes,
    inclusive: bool,
) -> Option<Bytes> {
    let bound = if inclusive {
        Bound::Excluded(CellKey::first_for_row(row_successor(row)))
    } else {
        Bound::Excluded(CellKey::first_for_row(row.clone()))
    };
    map.range((Bound::Unbounded, bound))
        .next_back()
        .map(|(k, _)| k.row.clone())
}

/// Applies timestamp-ceiling, tombstone and version rules to the merged
/// cells of one row, producing live versions per column (newest first).
pub fn assemble_row(
    merged: &BTreeMap<CellKey, CellValue>,
    timestamp: u64,
    versions: u32,
    columns: &ColumnFilter,
) -> BTreeMap<String, Vec<CellEntry>> {
    let mut out: BTreeMap<String, Vec<CellEntry>> = BTreeMap::new();
    let mut current: Option<&str> = None;
    let mut masked = false;
    for (key, value) in merged {
        if current != Some(key.column.as_str()) {
            current = Some(key.column.as_str());
            masked = false;
        }
        if masked || !columns.matches(&key.column) {
            continue;
        }
        if key.timestamp > timestamp {
            continue;
        }
        match value {
            CellValue::Delete => masked = true,
            CellValue::Put(bytes) => {
                let entries = out.entry(key.column.clone()).or_default();
                if (entries.len() as u32) < versions {
                    entries.push(CellEntry {
                        value: bytes.clone(),
                        timestamp: key.timestamp,
                    });
                }
            }
        }
    }
    out.retain(|_, entries| !entries.is_empty());
    out
}

fn row_result(
    row: Bytes,
    assembled: BTreeMap<String, Vec<CellEntry>>,
) -> Option<RowResult> {
    let cells: BTreeMap<String, CellEntry> = assembled
        .into_iter()
        .filter_map(|(column, mut entries)| {
            if entries.is_empty() {
                None
            } else {
                Some((column, entries.remove(0)))
            }
        })
        .collect();
    if cells.is_empty() {
        None
    } else {
        Some(RowResult { row, cells })
    }
}
