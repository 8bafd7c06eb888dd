// src/core/master/messages.rs

//! Wire types of the master dialog and the two queues that carry them:
//! the append-only outbound buffer and the bounded inbound instruction queue.

use crate::core::region::RegionDescriptor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// An event this server reports to the master. Buffered in order and drained
/// on each heartbeat; never deduplicated, the master tolerates repeats across
/// reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundMessage {
    /// The region is installed and serving.
    ReportOpen(RegionDescriptor),
    /// The region has been closed.
    ReportClose(RegionDescriptor),
    /// The region has been split; its children follow as `ReportOpen`s.
    ReportSplit(RegionDescriptor),
    /// An open of this region is still in progress; do not reassign it.
    ReportProcessOpen(RegionDescriptor),
    /// This server is shutting down.
    ReportExiting,
    /// User regions are closed; only catalog regions remain.
    ReportQuiesced,
}

/// An order issued by the master, executed by the worker (or, for the
/// control-flow variants, by the main loop itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    RegionOpen(RegionDescriptor),
    RegionClose(RegionDescriptor),
    RegionCloseWithoutReport(RegionDescriptor),
    ServerQuiesce,
    ServerStop,
    /// The master has lost its state; restart the dialog from scratch.
    CallServerStartup,
}

/// The identity under which the master tracks this server's lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub address: SocketAddr,
    /// Process start timestamp in milliseconds; regenerated when the master
    /// orders a restart of the dialog.
    pub start_code: u64,
    pub info_port: i32,
}

/// The load snapshot published with each heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLoad {
    /// Requests served since the last successful heartbeat.
    pub requests: u64,
    /// Regions currently online.
    pub regions: u32,
}

/// A startup or report call as framed on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MasterRequest {
    Startup {
        identity: ServerIdentity,
    },
    Report {
        identity: ServerIdentity,
        load: ServerLoad,
        messages: Vec<OutboundMessage>,
    },
}

/// The master's answer to a [`MasterRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MasterResponse {
    Startup { config: HashMap<String, String> },
    Report { instructions: Vec<Instruction> },
    Error { kind: String, message: String },
}

/// The append-only buffer of events awaiting the next heartbeat.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    inner: Mutex<Vec<OutboundMessage>>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: OutboundMessage) {
        self.inner.lock().push(message);
    }

    /// Swaps the buffer out for delivery, preserving append order.
    pub fn take_all(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// A copy of the pending messages, for tests and status reporting.
    pub fn snapshot(&self) -> Vec<OutboundMessage> {
        self.inner.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// An instruction queue entry with its retry budget spent so far.
#[derive(Debug, Clone)]
pub struct QueuedInstruction {
    pub instruction: Instruction,
    pub attempts: u32,
}

impl QueuedInstruction {
    pub fn new(instruction: Instruction) -> Self {
        Self {
            instruction,
            attempts: 0,
        }
    }
}

/// The bounded FIFO of master instructions awaiting the worker.
#[derive(Debug)]
pub struct InstructionQueue {
    inner: Mutex<VecDeque<QueuedInstruction>>,
    notify: Notify,
    capacity: usize,
}

impl InstructionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Appends an instruction; fails when the queue is full (the master will
    /// reissue on a later heartbeat).
    pub fn try_push(&self, instruction: Instruction) -> Result<(), Instruction> {
        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.capacity {
                return Err(instruction);
            }
            queue.push_back(QueuedInstruction::new(instruction));
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Puts a failed entry back at the head for retry.
    pub fn requeue(&self, entry: QueuedInstruction) {
        self.inner.lock().push_front(entry);
        self.notify.notify_one();
    }

    /// Dequeues the next entry, waiting up to `timeout` for one to arrive.
    pub async fn poll(&self, timeout: Duration) -> Option<QueuedInstruction> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(entry) = self.inner.lock().pop_front() {
                return Some(entry);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    /// Descriptors of every `RegionOpen` currently waiting in the queue, so
    /// the main loop can re-announce them each heartbeat.
    pub fn pending_opens(&self) -> Vec<RegionDescriptor> {
        self.inner
            .lock()
            .iter()
            .filter_map(|entry| match &entry.instruction {
                Instruction::RegionOpen(descriptor) => Some(descriptor.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
