// src/core/protocol.rs

//! The wire protocol: length-delimited JSON frames over TCP, plus the
//! request/response surface of the client RPC endpoint. The same codec
//! carries the master dialog.

use crate::core::RegionServerError;
use crate::core::region::{BatchUpdate, CellEntry, RegionDescriptor, RowResult, ScanFilter};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Name of the client-facing protocol answered by `GetProtocolVersion`.
pub const REGION_SERVER_PROTOCOL: &str = "regionserver";
/// Version of the client-facing protocol.
pub const PROTOCOL_VERSION: u64 = 3;

const LENGTH_PREFIX: usize = 4;
// Bounds a single frame to keep a malformed peer from forcing huge allocations.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// A `tokio_util::codec` pair framing JSON payloads with a big-endian length
/// prefix. `In` is what this side decodes, `Out` what it encodes.
#[derive(Debug)]
pub struct RpcCodec<In, Out> {
    _marker: PhantomData<fn() -> (In, Out)>,
}

impl<In, Out> Default for RpcCodec<In, Out> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<In, Out> RpcCodec<In, Out> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<In: DeserializeOwned, Out> Decoder for RpcCodec<In, Out> {
    type Item = In;
    type Error = RegionServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[0..LENGTH_PREFIX].try_into().expect("4 bytes")) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RegionServerError::Protocol(format!(
                "frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
            )));
        }
        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX);
        let payload = src.split_to(len);
        let item = serde_json::from_slice(&payload)?;
        Ok(Some(item))
    }
}

impl<In, Out: Serialize> Encoder<Out> for RpcCodec<In, Out> {
    type Error = RegionServerError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RegionServerError::Protocol(format!(
                "frame of {} bytes exceeds the {MAX_FRAME_SIZE} byte limit",
                payload.len()
            )));
        }
        dst.reserve(LENGTH_PREFIX + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// A client request against the region-server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    GetRegionInfo {
        region: String,
    },
    Get {
        region: String,
        row: Bytes,
        column: String,
        versions: Option<u32>,
        timestamp: Option<u64>,
    },
    GetRow {
        region: String,
        row: Bytes,
        timestamp: Option<u64>,
    },
    GetClosestRowBefore {
        region: String,
        row: Bytes,
    },
    BatchUpdate {
        region: String,
        timestamp: Option<u64>,
        update: BatchUpdate,
    },
    DeleteAll {
        region: String,
        row: Bytes,
        column: Option<String>,
        timestamp: u64,
    },
    DeleteFamily {
        region: String,
        row: Bytes,
        family: String,
        timestamp: u64,
    },
    OpenScanner {
        region: String,
        columns: Vec<String>,
        first_row: Bytes,
        timestamp: u64,
        filter: Option<ScanFilter>,
    },
    Next {
        scanner_id: u64,
    },
    CloseScanner {
        scanner_id: u64,
    },
    GetProtocolVersion {
        protocol: String,
        client_version: u64,
    },
}

/// The answer to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    RegionInfo(RegionDescriptor),
    Cells(Vec<CellEntry>),
    Row(Option<RowResult>),
    ScannerOpened { scanner_id: u64 },
    Done,
    ProtocolVersion(u64),
    Error { kind: String, message: String },
}

impl Response {
    pub fn from_error(error: &RegionServerError) -> Self {
        Response::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}
