//! Hop transfer session protocol.
//! Mostly host-driven: the host passes events in and performs the returned actions.
//! The one async piece is the chunk send pipeline (`pipeline`).

pub mod channel;
pub mod chunk;
pub mod compress;
pub mod config;
pub mod directory;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod integrity;
pub mod offer;
pub mod pipeline;
pub mod progress;
pub mod protocol;
pub mod reassembly;
pub mod relay;
pub mod retry;
pub mod scheduler;
pub mod transfer;
pub mod wire;

pub use channel::{ChannelAdapter, ChannelEvent, ChannelPayload, ChannelRole, ChannelState, PeerChannel};
pub use config::{DirectoryConfig, TransferConfig};
pub use directory::{LeaveOutcome, SessionDirectory};
pub use error::{Result, TransferError};
pub use identity::{ParticipantId, SessionCode};
pub use offer::TransferOffer;
pub use pipeline::{SendJob, SendReport};
pub use protocol::{ClientMessage, ControlMessage, FileInfo, ServerMessage, PROTOCOL_VERSION};
pub use reassembly::ReceivedFile;
pub use transfer::{Action, Notice, TransferMachine, TransferState, TransferStatus};
pub use wire::{decode_frame, encode_frame, ChunkFrame, FrameDecodeError, FrameEncodeError};
