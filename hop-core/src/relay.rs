//! Signal relay: stateless pass-through of opaque payloads between the two
//! participants of a session.

use std::time::Instant;

use crate::directory::SessionDirectory;
use crate::handshake::RejectReason;
use crate::identity::{ParticipantId, SessionCode};
use crate::offer::TransferOffer;
use crate::protocol::{ServerMessage, SignalKind};

/// What a participant asked the relay to pass on.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Signal {
        kind: SignalKind,
        payload: serde_json::Value,
    },
    TransferOffer(TransferOffer),
    TransferResponse {
        accepted: bool,
        reason: Option<RejectReason>,
    },
}

impl Envelope {
    fn label(&self) -> &'static str {
        match self {
            Envelope::Signal { .. } => "signal",
            Envelope::TransferOffer(_) => "transfer-offer",
            Envelope::TransferResponse { .. } => "transfer-response",
        }
    }

    fn stamp(self, from: ParticipantId) -> ServerMessage {
        match self {
            Envelope::Signal { kind, payload } => ServerMessage::Signal {
                from,
                kind,
                payload,
            },
            Envelope::TransferOffer(offer) => ServerMessage::TransferOffer { from, offer },
            Envelope::TransferResponse { accepted, reason } => ServerMessage::TransferResponse {
                from,
                accepted,
                reason,
            },
        }
    }
}

/// Deliver `message` to `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct Forward {
    pub to: ParticipantId,
    pub message: ServerMessage,
}

/// Route `envelope` from `from` to the other participant of `code`, unchanged
/// apart from the `from` stamp. Unknown session or absent peer: logged and dropped.
pub fn relay(
    directory: &mut SessionDirectory,
    code: &SessionCode,
    from: ParticipantId,
    envelope: Envelope,
    now: Instant,
) -> Option<Forward> {
    let Some(to) = directory.peer_of(code, from) else {
        tracing::warn!(
            code = %code,
            from = %from.short(),
            kind = envelope.label(),
            "no peer to relay to; dropping"
        );
        return None;
    };
    directory.touch(code, now);
    tracing::debug!(code = %code, from = %from.short(), to = %to.short(), kind = envelope.label(), "relayed");
    Some(Forward {
        to,
        message: envelope.stamp(from),
    })
}
