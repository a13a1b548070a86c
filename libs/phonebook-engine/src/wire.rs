//! Frame layout shared by both ends of a connection.
//!
//! Every frame is a JSON document behind a 4-byte big-endian length prefix.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::{EngineError, EngineResult};

/// Upper bound on a single frame (4 MiB).
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Reserved operation answered by the engine itself with the provider identity.
pub const IDENTITY_RPC: &str = "__identity__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub seq: u64,
    pub provider_id: u16,
    pub rpc: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub seq: u64,
    pub outcome: Outcome,
}

/// Transport-level outcome of a call. Application failures travel inside `Ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Err(String),
}

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub fn encode<T: Serialize>(frame: &T) -> EngineResult<Bytes> {
    serde_json::to_vec(frame)
        .map(Bytes::from)
        .map_err(EngineError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> EngineResult<T> {
    serde_json::from_slice(bytes).map_err(EngineError::Decode)
}

/// Sequence number of a frame that failed to decode, when it is still readable.
pub fn salvage_seq(bytes: &[u8]) -> Option<u64> {
    #[derive(Deserialize)]
    struct SeqOnly {
        seq: u64,
    }

    serde_json::from_slice::<SeqOnly>(bytes).ok().map(|frame| frame.seq)
}
