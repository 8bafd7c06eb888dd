// src/core/wal.rs

//! The write-ahead log: one per server, shared by every hosted region.
//!
//! Edits are framed as `[len][crc][bincode record]` and appended to numbered
//! segment files under the server's log directory. When the live segment
//! outgrows its threshold the WAL raises the roll signal; the log-roller task
//! performs the actual rotation so appends never pay for it.

use crate::core::RegionServerError;
use crate::core::metrics;
use bytes::Bytes;
use crc::{CRC_32_ISCSI, Crc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const SEGMENT_SUFFIX: &str = "wal";

/// One durable edit as written to a segment file.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
pub struct WalRecord {
    pub region: String,
    pub row: Vec<u8>,
    pub column: String,
    pub timestamp: u64,
    /// `None` encodes a tombstone.
    pub value: Option<Vec<u8>>,
    pub sequence: u64,
}

/// The runtime form of an edit a region hands to [`Wal::append`].
#[derive(Debug, Clone)]
pub struct WalEdit {
    pub row: Bytes,
    pub column: String,
    pub timestamp: u64,
    pub value: Option<Bytes>,
}

/// Raised by the WAL when the live segment wants rotation; consumed by the
/// log-roller task.
#[derive(Debug, Default)]
pub struct RollSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl RollSignal {
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Clears and returns the pending flag.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    /// Waits until a roll has been requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.requested.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
struct SegmentMeta {
    id: u64,
    path: PathBuf,
    last_sequence: u64,
}

struct WalInner {
    writer: BufWriter<File>,
    current: SegmentMeta,
    sealed: Vec<SegmentMeta>,
    closed: bool,
}

/// The server-wide write-ahead log.
pub struct Wal {
    dir: PathBuf,
    roll_threshold: u64,
    /// Last sequence id assigned to an edit.
    sequence: AtomicU64,
    /// Everything at or below this sequence is durable in store files.
    flush_floor: AtomicU64,
    segment_bytes: AtomicU64,
    roll_signal: Arc<RollSignal>,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Creates the log directory and its first segment. The caller is
    /// responsible for the already-running check on the directory.
    pub async fn create(
        dir: PathBuf,
        roll_threshold: u64,
        roll_signal: Arc<RollSignal>,
    ) -> Result<Wal, RegionServerError> {
        tokio::fs::create_dir_all(&dir).await?;
        let current = SegmentMeta {
            id: 0,
            path: dir.join(format!("0.{SEGMENT_SUFFIX}")),
            last_sequence: 0,
        };
        let writer = BufWriter::new(open_segment(&current.path).await?);
        info!("Created write-ahead log at {}", dir.display());
        Ok(Wal {
            dir,
            roll_threshold,
            sequence: AtomicU64::new(0),
            flush_floor: AtomicU64::new(0),
            segment_bytes: AtomicU64::new(0),
            roll_signal,
            inner: Mutex::new(WalInner {
                writer,
                current,
                sealed: Vec::new(),
                closed: false,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Last sequence id assigned.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Advances the sequence counter so future edits land above a region's
    /// recovered watermark.
    pub fn ensure_sequence_at_least(&self, sequence: u64) {
        self.sequence.fetch_max(sequence, Ordering::SeqCst);
    }

    /// Records the durability floor: everything at or below `sequence` is in
    /// store files, so sealed segments below it may be pruned on roll.
    pub fn set_flush_floor(&self, sequence: u64) {
        self.flush_floor.store(sequence, Ordering::SeqCst);
    }

    /// Appends a batch of edits for one region and returns the highest
    /// sequence id assigned to the batch.
    pub async fn append(
        &self,
        region: &str,
        edits: &[WalEdit],
    ) -> Result<u64, RegionServerError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(RegionServerError::IoString(
                "write-ahead log is closed".to_string(),
            ));
        }

        let mut last = 0;
        let mut written = 0u64;
        for edit in edits {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            last = sequence;
            let record = WalRecord {
                region: region.to_string(),
                row: edit.row.to_vec(),
                column: edit.column.clone(),
                timestamp: edit.timestamp,
                value: edit.value.as_ref().map(|v| v.to_vec()),
                sequence,
            };
            let payload = bincode::encode_to_vec(&record, bincode::config::standard())?;
            inner
                .writer
                .write_u32(payload.len() as u32)
                .await?;
            inner.writer.write_u32(CASTAGNOLI.checksum(&payload)).await?;
            inner.writer.write_all(&payload).await?;
            written += 8 + payload.len() as u64;
        }
        inner.writer.flush().await?;
        inner.current.last_sequence = inner.current.last_sequence.max(last);

        let size = self.segment_bytes.fetch_add(written, Ordering::SeqCst) + written;
        if size > self.roll_threshold {
            self.roll_signal.request();
        }
        Ok(last)
    }

    /// Rotates to a fresh segment and prunes sealed segments wholly below the
    /// flush floor. Called by the log-roller task under the process-wide
    /// roller lock.
    pub async fn roll(&self) -> Result<(), RegionServerError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.writer.flush().await?;

        let next_id = inner.current.id + 1;
        let next = SegmentMeta {
            id: next_id,
            path: self.dir.join(format!("{next_id}.{SEGMENT_SUFFIX}")),
            last_sequence: 0,
        };
        let writer = BufWriter::new(open_segment(&next.path).await?);
        let sealed = std::mem::replace(&mut inner.current, next);
        inner.writer = writer;
        inner.sealed.push(sealed);
        self.segment_bytes.store(0, Ordering::SeqCst);

        let floor = self.flush_floor.load(Ordering::SeqCst);
        let mut retained = Vec::new();
        for segment in inner.sealed.drain(..) {
            if floor > 0 && segment.last_sequence <= floor {
                debug!(
                    "Pruning sealed log segment {} (last seq {} <= floor {})",
                    segment.path.display(),
                    segment.last_sequence,
                    floor
                );
                if let Err(e) = tokio::fs::remove_file(&segment.path).await {
                    warn!(
                        "Could not remove sealed log segment {}: {}",
                        segment.path.display(),
                        e
                    );
                }
            } else {
                retained.push(segment);
            }
        }
        inner.sealed = retained;

        metrics::LOG_ROLLS_TOTAL.inc();
        info!("Rolled write-ahead log to segment {}", inner.current.id);
        Ok(())
    }

    /// Flushes and closes the log, leaving its files in place.
    pub async fn close(&self) -> Result<(), RegionServerError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.writer.flush().await?;
        inner.writer.get_mut().sync_all().await?;
        inner.closed = true;
        info!("Closed write-ahead log at {}", self.dir.display());
        Ok(())
    }

    /// Closes the log and deletes its directory; the graceful-stop path.
    pub async fn close_and_delete(&self) -> Result<(), RegionServerError> {
        self.close().await?;
        tokio::fs::remove_dir_all(&self.dir).await?;
        info!("Deleted write-ahead log at {}", self.dir.display());
        Ok(())
    }
}

async fn open_segment(path: &Path) -> Result<File, RegionServerError> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

/// Reads every intact record out of one segment (or recovered-edits) file.
/// A truncated or corrupt tail ends the read with a warning; everything
/// before it is returned.
pub async fn read_records(path: &Path) -> Result<Vec<WalRecord>, RegionServerError> {
    let raw = tokio::fs::read(path).await?;
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + 8 <= raw.len() {
        let len = u32::from_be_bytes(raw[offset..offset + 4].try_into().expect("4 bytes")) as usize;
        let crc = u32::from_be_bytes(raw[offset + 4..offset + 8].try_into().expect("4 bytes"));
        let start = offset + 8;
        let end = start + len;
        if end > raw.len() {
            warn!(
                "Truncated record at offset {} in {}; stopping replay",
                offset,
                path.display()
            );
            break;
        }
        let payload = &raw[start..end];
        if CASTAGNOLI.checksum(payload) != crc {
            warn!(
                "Checksum mismatch at offset {} in {}; stopping replay",
                offset,
                path.display()
            );
            break;
        }
        let (record, _): (WalRecord, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())?;
        records.push(record);
        offset = end;
    }
    Ok(records)
}
