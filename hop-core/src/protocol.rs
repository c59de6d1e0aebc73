//! Hop message types: relay signaling (client <-> relay) and peer-channel control.
//! All of these travel as JSON with a kebab-case `type` tag; chunk data uses the
//! binary frame in `wire`.

use serde::{Deserialize, Serialize};

use crate::handshake::RejectReason;
use crate::identity::ParticipantId;
use crate::offer::TransferOffer;

/// Current protocol version. Reported by the relay in `welcome`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Kind of an opaque channel-setup payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Client -> relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    CreateSession,
    JoinSession {
        code: String,
    },
    LeaveSession,
    /// Channel negotiation blob; forwarded verbatim.
    Signal {
        kind: SignalKind,
        payload: serde_json::Value,
    },
    TransferOffer(TransferOffer),
    TransferResponse {
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<RejectReason>,
    },
}

/// Relay -> client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome {
        participant_id: ParticipantId,
        protocol_version: u8,
    },
    SessionCreated {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SessionJoined {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PeerJoined {
        participant_id: ParticipantId,
    },
    PeerLeft {
        participant_id: ParticipantId,
    },
    SessionExpired {
        code: String,
    },
    Signal {
        from: ParticipantId,
        kind: SignalKind,
        payload: serde_json::Value,
    },
    TransferOffer {
        from: ParticipantId,
        #[serde(flatten)]
        offer: TransferOffer,
    },
    TransferResponse {
        from: ParticipantId,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<RejectReason>,
    },
    Error {
        message: String,
    },
}

/// Metadata sent on the peer channel before the first chunk. A new `file-info`
/// always resets the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub total_chunks: u32,
    pub chunk_size: u32,
    /// Compression was attempted for this transfer; each chunk still carries its own flag.
    pub compressed: bool,
    /// Lowercase hex SHA-256 of the whole file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// JSON control messages on the peer channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    FileInfo(FileInfo),
    /// Sender has issued every chunk; the ordered channel guarantees they precede this.
    TransferComplete {
        total_chunks: u32,
    },
    Cancel {
        reason: String,
    },
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
