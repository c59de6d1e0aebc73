//! Peer channel adapter. The host owns the real transport (a WebRTC data channel
//! or similar) and exposes it through `PeerChannel`; state changes and inbound
//! messages are fed back in through `ChannelAdapter`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{Result, TransferError};
use crate::protocol::ControlMessage;

/// Which side creates the channel. The sender initiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Failed,
}

impl ChannelState {
    fn to_u8(self) -> u8 {
        match self {
            ChannelState::Connecting => 0,
            ChannelState::Open => 1,
            ChannelState::Closed => 2,
            ChannelState::Failed => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            3 => ChannelState::Failed,
            _ => ChannelState::Closed,
        }
    }
}

/// One ordered channel message: JSON control as text, chunk frames as binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl ChannelPayload {
    pub fn len(&self) -> usize {
        match self {
            ChannelPayload::Text(s) => s.len(),
            ChannelPayload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport capability supplied by the host.
pub trait PeerChannel: Send + Sync {
    /// Start connecting. Completion is reported later via `ChannelAdapter::on_state_change`.
    fn open(&self, role: ChannelRole) -> Result<()>;
    /// Queue one message. Must preserve order.
    fn send(&self, payload: ChannelPayload) -> Result<()>;
    fn close(&self);
    /// Bytes accepted by `send` but not yet on the wire.
    fn buffered_amount(&self) -> u64 {
        0
    }
}

/// Lifecycle change surfaced to the transfer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Closed,
    Failed,
}

/// Tracks channel state around a `PeerChannel`. Never retries on its own;
/// retry policy lives in the state machine. Cheap to clone into chunk tasks.
#[derive(Clone)]
pub struct ChannelAdapter {
    inner: Arc<dyn PeerChannel>,
    state: Arc<AtomicU8>,
}

impl std::fmt::Debug for ChannelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAdapter")
            .field("state", &self.state())
            .finish()
    }
}

impl ChannelAdapter {
    pub fn new(inner: Arc<dyn PeerChannel>) -> Self {
        Self {
            inner,
            state: Arc::new(AtomicU8::new(ChannelState::Closed.to_u8())),
        }
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// Begin (re)connecting. The transport reports the outcome asynchronously.
    pub fn open(&self, role: ChannelRole) -> Result<()> {
        self.set_state(ChannelState::Connecting);
        tracing::debug!(?role, "opening peer channel");
        if let Err(e) = self.inner.open(role) {
            self.set_state(ChannelState::Failed);
            return Err(e);
        }
        Ok(())
    }

    /// Apply a transport state report. Returns the event to surface, or `None`
    /// for repeats and transitions that cannot happen (e.g. `Closed -> Open`).
    pub fn on_state_change(&self, next: ChannelState) -> Option<ChannelEvent> {
        let current = self.state();
        let event = match (current, next) {
            (ChannelState::Connecting, ChannelState::Open) => ChannelEvent::Opened,
            (ChannelState::Connecting | ChannelState::Open, ChannelState::Failed) => {
                ChannelEvent::Failed
            }
            (ChannelState::Connecting | ChannelState::Open, ChannelState::Closed) => {
                ChannelEvent::Closed
            }
            _ => {
                tracing::debug!(?current, ?next, "ignoring channel state report");
                return None;
            }
        };
        self.set_state(next);
        tracing::info!(?current, ?next, "peer channel state changed");
        Some(event)
    }

    /// Send one message. Outside `Open` this is `ChannelNotOpen`.
    pub fn send(&self, payload: ChannelPayload) -> Result<()> {
        if !self.is_open() {
            return Err(TransferError::ChannelNotOpen);
        }
        self.inner.send(payload)
    }

    /// Serialize and send a JSON control message.
    pub fn send_control(&self, msg: &ControlMessage) -> Result<()> {
        let text = msg
            .to_json()
            .map_err(|e| TransferError::MalformedMessage(e.to_string()))?;
        self.send(ChannelPayload::Text(text))
    }

    /// Gate an inbound message. Messages arriving outside `Open` are refused.
    pub fn on_message(&self, payload: ChannelPayload) -> Result<ChannelPayload> {
        if !self.is_open() {
            tracing::warn!(len = payload.len(), "message on channel that is not open");
            return Err(TransferError::ChannelNotOpen);
        }
        Ok(payload)
    }

    /// Local teardown. Produces no event.
    pub fn close(&self) {
        let prev = self.state();
        self.set_state(ChannelState::Closed);
        if prev != ChannelState::Closed {
            self.inner.close();
        }
    }

    pub fn buffered_amount(&self) -> u64 {
        self.inner.buffered_amount()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory `PeerChannel` that records everything sent through it.

    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct LoopbackChannel {
        pub sent: Mutex<Vec<ChannelPayload>>,
        pub opens: AtomicUsize,
        pub closes: AtomicUsize,
        /// Fail every send once this many messages have gone through.
        pub fail_after: Option<usize>,
        pub buffered: AtomicU64,
    }

    impl LoopbackChannel {
        pub fn failing_after(n: usize) -> Self {
            Self {
                fail_after: Some(n),
                ..Self::default()
            }
        }

        pub fn take_sent(&self) -> Vec<ChannelPayload> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl PeerChannel for LoopbackChannel {
        fn open(&self, _role: ChannelRole) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, payload: ChannelPayload) -> Result<()> {
            let mut sent = self.sent.lock().unwrap();
            if let Some(limit) = self.fail_after {
                if sent.len() >= limit {
                    return Err(TransferError::ChannelFailed);
                }
            }
            sent.push(payload);
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn buffered_amount(&self) -> u64 {
            self.buffered.load(Ordering::SeqCst)
        }
    }

    /// An adapter over a fresh loopback channel, already open.
    pub fn open_pair() -> (ChannelAdapter, Arc<LoopbackChannel>) {
        let raw = Arc::new(LoopbackChannel::default());
        let adapter = ChannelAdapter::new(raw.clone());
        adapter.open(ChannelRole::Initiator).unwrap();
        adapter.on_state_change(ChannelState::Open).unwrap();
        (adapter, raw)
    }
}
