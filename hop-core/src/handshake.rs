//! Offer/accept/reject exchange that precedes any chunk traffic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};
use crate::offer::TransferOffer;

/// Why an offer was refused. Sent in `transfer-response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// The user said no.
    Declined,
    /// Another transfer was already under way.
    Busy,
    Invalid,
    TooLarge,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Declined => "declined",
            RejectReason::Busy => "busy",
            RejectReason::Invalid => "invalid",
            RejectReason::TooLarge => "too-large",
        }
    }

    fn for_error(err: &TransferError) -> Self {
        match err {
            TransferError::FileTooLarge { .. } => RejectReason::TooLarge,
            _ => RejectReason::Invalid,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We sent the offer.
    Outgoing,
    /// The peer sent it.
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Offered {
        offer: TransferOffer,
        direction: Direction,
    },
    Accepted(TransferOffer),
}

/// What became of an incoming offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferDecision {
    /// Waiting on the user.
    Pending(TransferOffer),
    /// Answered without asking the user; send `transfer-response {accepted:false, reason}`.
    AutoRejected {
        reason: RejectReason,
        error: String,
    },
}

/// One participant's side of the handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
    max_file_size: u64,
}

impl Handshake {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            state: HandshakeState::Idle,
            max_file_size,
        }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == HandshakeState::Idle
    }

    /// Sender: propose `offer` to the peer.
    pub fn offer(&mut self, offer: TransferOffer) -> Result<()> {
        if !self.is_idle() {
            return Err(TransferError::HandshakeBusy);
        }
        offer.validate(self.max_file_size)?;
        tracing::info!(file = %offer.file_name, size = offer.file_size, "offering file");
        self.state = HandshakeState::Offered {
            offer,
            direction: Direction::Outgoing,
        };
        Ok(())
    }

    /// Receiver: an offer arrived. Busy or invalid offers are rejected automatically.
    pub fn on_offer(&mut self, offer: TransferOffer) -> OfferDecision {
        if !self.is_idle() {
            tracing::warn!(file = %offer.file_name, "offer while busy; auto-rejecting");
            return OfferDecision::AutoRejected {
                reason: RejectReason::Busy,
                error: TransferError::HandshakeBusy.to_string(),
            };
        }
        if let Err(e) = offer.validate(self.max_file_size) {
            let reason = RejectReason::for_error(&e);
            tracing::warn!(file = %offer.file_name, %reason, error = %e, "rejecting invalid offer");
            return OfferDecision::AutoRejected {
                reason,
                error: e.to_string(),
            };
        }
        self.state = HandshakeState::Offered {
            offer: offer.clone(),
            direction: Direction::Incoming,
        };
        OfferDecision::Pending(offer)
    }

    /// Receiver: the user accepted. Returns the agreed offer.
    pub fn accept(&mut self) -> Result<TransferOffer> {
        match &self.state {
            HandshakeState::Offered {
                offer,
                direction: Direction::Incoming,
            } => {
                let offer = offer.clone();
                self.state = HandshakeState::Accepted(offer.clone());
                Ok(offer)
            }
            _ => Err(TransferError::MalformedMessage(
                "no incoming offer to accept".into(),
            )),
        }
    }

    /// Receiver: the user declined.
    pub fn reject(&mut self) -> Result<()> {
        match &self.state {
            HandshakeState::Offered {
                direction: Direction::Incoming,
                ..
            } => {
                self.state = HandshakeState::Idle;
                Ok(())
            }
            _ => Err(TransferError::MalformedMessage(
                "no incoming offer to reject".into(),
            )),
        }
    }

    /// Sender: the peer answered. `Some(offer)` when accepted, `None` when rejected.
    pub fn on_response(&mut self, accepted: bool) -> Result<Option<TransferOffer>> {
        let offer = match &self.state {
            HandshakeState::Offered {
                offer,
                direction: Direction::Outgoing,
            } => offer.clone(),
            _ => {
                return Err(TransferError::MalformedMessage(
                    "unexpected transfer-response".into(),
                ))
            }
        };
        if accepted {
            self.state = HandshakeState::Accepted(offer.clone());
            Ok(Some(offer))
        } else {
            self.state = HandshakeState::Idle;
            Ok(None)
        }
    }

    pub fn reset(&mut self) {
        self.state = HandshakeState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_FILE_SIZE;

    fn offer(size: u64) -> TransferOffer {
        TransferOffer::for_file("a.txt", size, "text/plain", DEFAULT_MAX_FILE_SIZE).unwrap()
    }

    #[test]
    fn sender_accept_path() {
        let mut h = Handshake::new(DEFAULT_MAX_FILE_SIZE);
        h.offer(offer(10)).unwrap();
        assert!(matches!(h.offer(offer(10)), Err(TransferError::HandshakeBusy)));
        let agreed = h.on_response(true).unwrap().unwrap();
        assert_eq!(agreed.file_size, 10);
        assert_eq!(h.state(), &HandshakeState::Accepted(agreed));
    }

    #[test]
    fn sender_reject_returns_to_idle() {
        let mut h = Handshake::new(DEFAULT_MAX_FILE_SIZE);
        h.offer(offer(10)).unwrap();
        assert_eq!(h.on_response(false).unwrap(), None);
        assert!(h.is_idle());
        assert!(h.on_response(true).is_err());
    }

    #[test]
    fn receiver_accept_and_reject() {
        let mut h = Handshake::new(DEFAULT_MAX_FILE_SIZE);
        assert!(matches!(h.on_offer(offer(5)), OfferDecision::Pending(_)));
        h.reject().unwrap();
        assert!(h.is_idle());
        assert!(matches!(h.on_offer(offer(5)), OfferDecision::Pending(_)));
        assert_eq!(h.accept().unwrap().file_size, 5);
        assert!(h.accept().is_err());
    }

    #[test]
    fn concurrent_offer_is_busy() {
        let mut h = Handshake::new(DEFAULT_MAX_FILE_SIZE);
        h.on_offer(offer(5));
        match h.on_offer(offer(6)) {
            OfferDecision::AutoRejected { reason, .. } => assert_eq!(reason, RejectReason::Busy),
            other => panic!("expected busy, got {:?}", other),
        }
        // The first offer is still the pending one.
        assert_eq!(h.accept().unwrap().file_size, 5);
    }

    #[test]
    fn invalid_offers_auto_rejected() {
        let mut h = Handshake::new(100);
        let mut zero = offer(5);
        zero.file_size = 0;
        zero.total_chunks = 0;
        assert!(matches!(
            h.on_offer(zero),
            OfferDecision::AutoRejected {
                reason: RejectReason::Invalid,
                ..
            }
        ));
        assert!(matches!(
            h.on_offer(offer(1000)),
            OfferDecision::AutoRejected {
                reason: RejectReason::TooLarge,
                ..
            }
        ));
        assert!(h.is_idle());
    }

    #[test]
    fn reason_serializes_kebab() {
        assert_eq!(
            serde_json::to_string(&RejectReason::TooLarge).unwrap(),
            r#""too-large""#
        );
        assert_eq!(RejectReason::Busy.to_string(), "busy");
    }
}
