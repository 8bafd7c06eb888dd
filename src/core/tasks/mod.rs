// src/core/tasks/mod.rs

//! This module contains all long-running background tasks that support the
//! server's core functionality: instruction execution, memtable flushing,
//! compaction and splitting, log rolling and lease expiry.

pub mod compactor;
pub mod flusher;
pub mod lease_checker;
pub mod log_roller;
pub mod worker;
