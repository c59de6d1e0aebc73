//! Failure kinds shared by every stage of a transfer.

use crate::wire::{FrameDecodeError, FrameEncodeError};

/// Every way a pairing or transfer can fail. Each kind maps to a stable reason code
/// that is shown to the user and, where relevant, sent to the peer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("session not found or expired")]
    SessionNotFound,
    #[error("session already has a receiver")]
    SessionFull,
    #[error("no free session code after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("invalid offer: {0}")]
    InvalidOffer(String),
    #[error("file too large: {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },
    #[error("peer channel is not open")]
    ChannelNotOpen,
    #[error("peer channel failed")]
    ChannelFailed,
    #[error("peer channel closed unexpectedly")]
    ChannelClosedUnexpectedly,
    #[error("chunk integrity mismatch: {0}")]
    ChunkIntegrityMismatch(String),
    #[error("offer received while a transfer is already in progress")]
    HandshakeBusy,
    #[error("peer channel retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("chunk {index} completed more than once")]
    DuplicateSend { index: u32 },
    #[error("transfer stalled: {0}")]
    TransferStalled(String),
    #[error("peer left the session")]
    PeerLeft,
    #[error("peer cancelled the transfer: {0}")]
    PeerCancelled(String),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("chunk task failed: {0}")]
    TaskFailed(String),
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
    #[error("frame encode error: {0}")]
    FrameEncode(#[from] FrameEncodeError),
    #[error("frame decode error: {0}")]
    FrameDecode(#[from] FrameDecodeError),
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

impl TransferError {
    /// Stable kebab-case reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TransferError::SessionNotFound => "session-not-found",
            TransferError::SessionFull => "session-full",
            TransferError::Exhausted { .. } => "exhausted",
            TransferError::InvalidOffer(_) => "invalid-offer",
            TransferError::FileTooLarge { .. } => "file-too-large",
            TransferError::ChannelNotOpen => "channel-not-open",
            TransferError::ChannelFailed => "channel-failed",
            TransferError::ChannelClosedUnexpectedly => "channel-closed",
            TransferError::ChunkIntegrityMismatch(_) => "chunk-integrity-mismatch",
            TransferError::HandshakeBusy => "handshake-busy",
            TransferError::RetriesExhausted { .. } => "retries-exhausted",
            TransferError::MalformedMessage(_) => "malformed-message",
            TransferError::DuplicateSend { .. } => "duplicate-send",
            TransferError::TransferStalled(_) => "transfer-stalled",
            TransferError::PeerLeft => "peer-left",
            TransferError::PeerCancelled(_) => "peer-cancelled",
            TransferError::Cancelled => "cancelled",
            TransferError::TaskFailed(_) => "task-failed",
            TransferError::Compression(_) => "compression",
            TransferError::FrameEncode(_) => "frame-encode",
            TransferError::FrameDecode(_) => "malformed-message",
        }
    }

    /// Only a failed channel is worth another attempt; everything else goes straight to `Error`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::ChannelFailed)
    }
}
