//! Binary chunk framing: length-prefix (4 bytes LE) + bincode `ChunkFrame`.
//! Control messages travel as JSON text (see `protocol::ControlMessage`); only
//! chunk data uses this frame.

use serde::{Deserialize, Serialize};

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// One chunk on the peer channel. `compressed` describes this payload only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFrame {
    pub index: u32,
    pub total_chunks: u32,
    pub compressed: bool,
    pub payload: Vec<u8>,
}

/// Encode a chunk into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(frame: &ChunkFrame) -> Result<Vec<u8>, FrameEncodeError> {
    let body = bincode::serialize(frame).map_err(FrameEncodeError::Encode)?;
    if body.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    let len = body.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Error encoding a chunk into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the chunk and the number of bytes consumed.
/// A partial buffer yields `NeedMore`; the caller retries once more data has arrived.
pub fn decode_frame(bytes: &[u8]) -> Result<(ChunkFrame, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let frame: ChunkFrame = bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len])
        .map_err(FrameDecodeError::Decode)?;
    Ok((frame, LEN_SIZE + len))
}

/// Decode a binary channel message that must hold exactly one frame.
pub fn decode_message(bytes: &[u8]) -> Result<ChunkFrame, FrameDecodeError> {
    let (frame, used) = decode_frame(bytes)?;
    if used != bytes.len() {
        return Err(FrameDecodeError::Trailing(bytes.len() - used));
    }
    Ok(frame)
}

/// Error decoding a frame (need more bytes, too large, trailing data, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("{0} trailing bytes after frame")]
    Trailing(usize),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
