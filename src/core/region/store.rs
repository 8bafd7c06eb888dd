// src/core/region/store.rs

//! On-disk stores: immutable, sorted cell files produced by memtable flushes
//! and merged by compaction. One `Store` manages all files of one column
//! family of one region; the cell data of every file is kept resident so
//! reads never touch the filesystem.

use super::memtable::{CellKey, CellValue};
use crate::core::RegionServerError;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const STORE_FILE_SUFFIX: &str = "store";

/// The serialized form of one cell inside a store file.
#[derive(bincode::Encode, bincode::Decode)]
struct StoredCell {
    row: Vec<u8>,
    column: String,
    timestamp: u64,
    /// `None` encodes a tombstone.
    value: Option<Vec<u8>>,
}

/// The whole-file image a flush writes and a load reads back.
#[derive(bincode::Encode, bincode::Decode)]
struct StoreFileImage {
    max_sequence_id: u64,
    cells: Vec<StoredCell>,
}

/// One immutable flushed file, with its cells resident in memory.
#[derive(Debug, Clone)]
pub struct StoreFile {
    pub path: PathBuf,
    pub file_id: u64,
    /// Highest write-ahead-log sequence id covered by this file; everything
    /// at or below it is durable here.
    pub max_sequence_id: u64,
    pub bytes: u64,
    pub cells: Arc<BTreeMap<CellKey, CellValue>>,
}

impl StoreFile {
    /// Encodes and writes `cells` to `path`, returning the resident handle.
    pub async fn write(
        path: PathBuf,
        file_id: u64,
        max_sequence_id: u64,
        cells: BTreeMap<CellKey, CellValue>,
    ) -> Result<StoreFile, RegionServerError> {
        let image = StoreFileImage {
            max_sequence_id,
            cells: cells
                .iter()
                .map(|(k, v)| StoredCell {
                    row: k.row.to_vec(),
                    column: k.column.clone(),
                    timestamp: k.timestamp,
                    value: match v {
                        CellValue::Put(b) => Some(b.to_vec()),
                        CellValue::Delete => None,
                    },
                })
                .collect(),
        };
        let encoded = bincode::encode_to_vec(&image, bincode::config::standard())?;
        let bytes = encoded.len() as u64;
        tokio::fs::write(&path, encoded).await?;
        debug!(
            "Wrote store file {} ({} cells, {} bytes, max seq {})",
            path.display(),
            cells.len(),
            bytes,
            max_sequence_id
        );
        Ok(StoreFile {
            path,
            file_id,
            max_sequence_id,
            bytes,
            cells: Arc::new(cells),
        })
    }

    /// Loads a store file written by [`StoreFile::write`].
    pub async fn load(path: PathBuf, file_id: u64) -> Result<StoreFile, RegionServerError> {
        let raw = tokio::fs::read(&path).await?;
        let bytes = raw.len() as u64;
        let (image, _): (StoreFileImage, usize) =
            bincode::decode_from_slice(&raw, bincode::config::standard())?;
        let mut cells = BTreeMap::new();
        for c in image.cells {
            cells.insert(
                CellKey::new(Bytes::from(c.row), c.column, c.timestamp),
                match c.value {
                    Some(v) => CellValue::Put(Bytes::from(v)),
                    None => CellValue::Delete,
                },
            );
        }
        Ok(StoreFile {
            path,
            file_id,
            max_sequence_id: image.max_sequence_id,
            bytes,
            cells: Arc::new(cells),
        })
    }
}

/// A plan produced under the store lock and executed outside it: the merged
/// cells to persist and the files the result replaces.
pub struct CompactionPlan {
    pub target_path: PathBuf,
    pub target_id: u64,
    pub max_sequence_id: u64,
    pub merged: BTreeMap<CellKey, CellValue>,
    pub replaced: Vec<StoreFile>,
}

/// All store files of one column family of one region.
#[derive(Debug)]
pub struct Store {
    pub family: String,
    dir: PathBuf,
    /// Ordered oldest first; later files shadow earlier ones.
    files: Vec<StoreFile>,
    next_file_id: u64,
    max_versions: u32,
}

impl Store {
    /// Opens the family directory under `region_dir`, loading any files left
    /// by a previous incarnation of this region.
    pub async fn open(
        family: &str,
        region_dir: &Path,
        max_versions: u32,
    ) -> Result<Store, RegionServerError> {
        let dir = region_dir.join(family);
        tokio::fs::create_dir_all(&dir).await?;

        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some(STORE_FILE_SUFFIX) {
                continue;
            }
            match stem.parse::<u64>() {
                Ok(id) => found.push((id, path)),
                Err(_) => warn!("Ignoring unrecognized file in store dir: {}", path.display()),
            }
        }
        found.sort_by_key(|(id, _)| *id);

        let mut files = Vec::with_capacity(found.len());
        let mut next_file_id = 0;
        for (id, path) in found {
            files.push(StoreFile::load(path, id).await?);
            next_file_id = next_file_id.max(id + 1);
        }

        Ok(Store {
            family: family.to_string(),
            dir,
            files,
            next_file_id,
            max_versions,
        })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }

    /// Highest sequence id made durable by this store's files.
    pub fn max_sequence_id(&self) -> u64 {
        self.files.iter().map(|f| f.max_sequence_id).max().unwrap_or(0)
    }

    /// Snapshots the resident cell maps, oldest file first.
    pub fn cell_sources(&self) -> Vec<Arc<BTreeMap<CellKey, CellValue>>> {
        self.files.iter().map(|f| f.cells.clone()).collect()
    }

    /// Reserves the path and id for the next flushed file.
    pub fn next_flush_target(&mut self) -> (PathBuf, u64) {
        let id = self.next_file_id;
        self.next_file_id += 1;
        (self.dir.join(format!("{id}.{STORE_FILE_SUFFIX}")), id)
    }

    /// Installs a freshly written flush file.
    pub fn add_file(&mut self, file: StoreFile) {
        self.files.push(file);
    }

    /// Builds a compaction plan merging every current file, or `None` when
    /// there is nothing to merge.
    pub fn plan_compaction(&mut self) -> Option<CompactionPlan> {
        if self.files.len() < 2 {
            return None;
        }
        let merged = merge_and_prune(
            &self.files.iter().map(|f| f.cells.clone()).collect::<Vec<_>>(),
            self.max_versions,
        );
        let max_sequence_id = self.max_sequence_id();
        let target_id = self.next_file_id;
        self.next_file_id += 1;
        Some(CompactionPlan {
            target_path: self.dir.join(format!("{target_id}.{STORE_FILE_SUFFIX}")),
            target_id,
            max_sequence_id,
            merged,
            replaced: self.files.clone(),
        })
    }

    /// Swaps the compacted file in for the files it replaces. The caller
    /// deletes the replaced paths afterwards.
    pub fn complete_compaction(&mut self, plan_replaced: &[StoreFile], compacted: StoreFile) {
        let replaced_ids: BTreeSet<u64> = plan_replaced.iter().map(|f| f.file_id).collect();
        self.files.retain(|f| !replaced_ids.contains(&f.file_id));
        self.files.push(compacted);
        self.files.sort_by_key(|f| f.file_id);
    }

    /// The middle distinct row key across all files, used as the split point.
    pub fn middle_row(&self) -> Option<Bytes> {
        let mut rows: BTreeSet<Bytes> = BTreeSet::new();
        for file in &self.files {
            for key in file.cells.keys() {
                rows.insert(key.row.clone());
            }
        }
        if rows.len() < 2 {
            return None;
        }
        rows.iter().nth(rows.len() / 2).cloned()
    }
}

/// Merges cell maps (oldest first, newer shadowing older at identical keys)
/// and prunes versions: puts masked by a tombstone are dropped, live puts are
/// capped at `max_versions` per column, tombstones themselves are retained so
/// unflushed older puts stay masked.
pub fn merge_and_prune(
    sources: &[Arc<BTreeMap<CellKey, CellValue>>],
    max_versions: u32,
) -> BTreeMap<CellKey, CellValue> {
    let mut merged: BTreeMap<CellKey, CellValue> = BTreeMap::new();
    for source in sources {
        for (k, v) in source.iter() {
            merged.insert(k.clone(), v.clone());
        }
    }

    let mut pruned: BTreeMap<CellKey, CellValue> = BTreeMap::new();
    let mut current: Option<(Bytes, String)> = None;
    let mut kept_versions = 0u32;
    let mut masked = false;
    for (k, v) in merged {
        let column_key = (k.row.clone(), k.column.clone());
        if current.as_ref() != Some(&column_key) {
            current = Some(column_key);
            kept_versions = 0;
            masked = false;
        }
        match v {
            CellValue::Delete => {
                if !masked {
                    pruned.insert(k, CellValue::Delete);
                    masked = true;
                }
            }
            CellValue::Put(b) => {
                if !masked && kept_versions < max_versions {
                    kept_versions += 1;
                    pruned.insert(k, CellValue::Put(b));
                }
            }
        }
    }
    pruned
}
