// src/core/master/mod.rs

//! Everything the server exchanges with the master: message and instruction
//! types, the outbound buffer drained on heartbeats, the inbound instruction
//! queue consumed by the worker, and the RPC client.

pub mod client;
pub mod messages;

pub use client::{MasterClient, TcpMasterClient};
pub use messages::{
    Instruction, InstructionQueue, MasterRequest, MasterResponse, MessageBuffer, OutboundMessage,
    QueuedInstruction, ServerIdentity, ServerLoad,
};
