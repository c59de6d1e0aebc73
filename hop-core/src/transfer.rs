//! Transfer state machine. Host-driven: every input is a method call and every
//! side effect comes back as an `Action` for the host to perform.

use std::time::{Duration, Instant};

use crate::channel::{ChannelEvent, ChannelPayload, ChannelRole};
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::handshake::{Handshake, OfferDecision, RejectReason};
use crate::offer::TransferOffer;
use crate::pipeline::SendReport;
use crate::progress::Progress;
use crate::protocol::ControlMessage;
use crate::reassembly::{ChunkReceiveResult, ReassemblyEngine, ReceivedFile};
use crate::retry::Backoff;
use crate::wire;

/// Why a transfer ended in `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Stable kebab-case reason code.
    pub code: &'static str,
    pub message: String,
}

impl From<&TransferError> for Failure {
    fn from(e: &TransferError) -> Self {
        Failure {
            code: e.reason_code(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Offering,
    AwaitingResponse,
    Sending,
    Receiving,
    Completed,
    Error(Failure),
}

impl TransferState {
    /// Between a local offer (or accept) and completion.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransferState::Offering
                | TransferState::AwaitingResponse
                | TransferState::Sending
                | TransferState::Receiving
        )
    }
}

/// User-facing events.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// An offer is waiting for accept/reject.
    OfferReceived(TransferOffer),
    /// An incoming offer was refused without asking the user.
    OfferRefused { reason: RejectReason, message: String },
    /// The peer refused our offer.
    Rejected { reason: Option<RejectReason> },
    Retrying { attempt: u32, delay: Duration },
    Completed { file_name: String },
    Failed(Failure),
    PeerLeft,
}

/// Side effects for the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send `transfer-offer` through the relay.
    RelayOffer(TransferOffer),
    /// Send `transfer-response` through the relay.
    RelayResponse {
        accepted: bool,
        reason: Option<RejectReason>,
    },
    /// (Re)open the peer channel once `after` has elapsed.
    OpenChannel { role: ChannelRole, after: Duration },
    CloseChannel,
    SendControl(ControlMessage),
    /// Run the send pipeline for this offer from chunk 0.
    StartSending(TransferOffer),
    /// Cancel the running send pipeline.
    AbortSending,
    /// Hand the file to local save.
    Deliver(ReceivedFile),
    Notify(Notice),
}

/// Runtime record of one accepted transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub offer: TransferOffer,
    pub completed_chunks: u32,
    pub bytes_transferred: u64,
    pub started_at: Instant,
    pub peak_throughput: f64,
    pub current_concurrency: usize,
    pub channel_attempts: u32,
    backoff: Backoff,
}

impl TransferSession {
    fn new(offer: TransferOffer, config: &TransferConfig) -> Self {
        Self {
            current_concurrency: offer.band().initial_concurrency,
            offer,
            completed_chunks: 0,
            bytes_transferred: 0,
            started_at: Instant::now(),
            peak_throughput: 0.0,
            channel_attempts: 0,
            backoff: Backoff::new(config.retry_policy()),
        }
    }
}

/// Snapshot for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStatus {
    pub state: TransferState,
    pub file_name: Option<String>,
    pub progress: Progress,
    pub channel_attempts: u32,
}

/// One participant's transfer lifecycle, sending or receiving.
#[derive(Debug)]
pub struct TransferMachine {
    state: TransferState,
    config: TransferConfig,
    handshake: Handshake,
    reassembly: ReassemblyEngine,
    session: Option<TransferSession>,
}

impl TransferMachine {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            state: TransferState::Idle,
            handshake: Handshake::new(config.max_file_size),
            reassembly: ReassemblyEngine::new(config.max_file_size),
            session: None,
            config,
        }
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    fn transition(&mut self, next: TransferState) {
        if self.state != next {
            tracing::info!(from = ?self.state, to = ?next, "transfer state");
            self.state = next;
        }
    }

    // ---- sender ----

    /// Propose a file to the peer. `Idle -> Offering`.
    pub fn send_file(&mut self, offer: TransferOffer) -> Result<Vec<Action>> {
        if self.state != TransferState::Idle {
            return Err(TransferError::HandshakeBusy);
        }
        self.handshake.offer(offer.clone())?;
        self.transition(TransferState::Offering);
        Ok(vec![Action::RelayOffer(offer)])
    }

    /// The relay took the offer. `Offering -> AwaitingResponse`.
    pub fn offer_relayed(&mut self) {
        if self.state == TransferState::Offering {
            self.transition(TransferState::AwaitingResponse);
        }
    }

    /// The peer answered our offer.
    pub fn on_response(&mut self, accepted: bool, reason: Option<RejectReason>) -> Vec<Action> {
        if !matches!(
            self.state,
            TransferState::Offering | TransferState::AwaitingResponse
        ) {
            tracing::warn!(state = ?self.state, "ignoring unexpected transfer-response");
            return Vec::new();
        }
        match self.handshake.on_response(accepted) {
            Ok(Some(offer)) => {
                tracing::info!(file = %offer.file_name, "offer accepted");
                self.session = Some(TransferSession::new(offer, &self.config));
                self.transition(TransferState::Sending);
                vec![Action::OpenChannel {
                    role: ChannelRole::Initiator,
                    after: Duration::ZERO,
                }]
            }
            Ok(None) => {
                tracing::warn!(?reason, "offer rejected");
                self.transition(TransferState::Idle);
                vec![Action::Notify(Notice::Rejected { reason })]
            }
            Err(e) => self.fail(e),
        }
    }

    /// Send pipeline progress.
    pub fn on_send_progress(&mut self, progress: &Progress) {
        if self.state != TransferState::Sending {
            return;
        }
        if let Some(s) = self.session.as_mut() {
            s.completed_chunks = progress.chunks_done;
            s.bytes_transferred = progress.bytes_done;
            s.current_concurrency = progress.concurrency;
            s.peak_throughput = s.peak_throughput.max(progress.peak_throughput);
        }
    }

    /// The send pipeline returned. Channel-level failures are left to `on_channel_event`.
    pub fn on_send_finished(&mut self, result: Result<SendReport>) -> Vec<Action> {
        if self.state != TransferState::Sending {
            return Vec::new();
        }
        match result {
            Ok(report) => {
                let Some(s) = self.session.as_mut() else {
                    return Vec::new();
                };
                s.completed_chunks = report.chunks_sent;
                s.bytes_transferred = report.bytes_sent;
                s.peak_throughput = s.peak_throughput.max(report.peak_throughput);
                if report.chunks_sent != s.offer.total_chunks {
                    let err = TransferError::ChunkIntegrityMismatch(format!(
                        "sent {} of {} chunks",
                        report.chunks_sent, s.offer.total_chunks
                    ));
                    return self.fail(err);
                }
                let file_name = s.offer.file_name.clone();
                self.handshake.reset();
                self.transition(TransferState::Completed);
                vec![Action::Notify(Notice::Completed { file_name })]
            }
            Err(e)
                if e.is_retryable()
                    || matches!(e, TransferError::ChannelNotOpen | TransferError::Cancelled) =>
            {
                tracing::debug!("send stopped by channel; awaiting channel event");
                Vec::new()
            }
            Err(e) => self.fail(e),
        }
    }

    // ---- receiver ----

    /// An offer arrived through the relay.
    pub fn on_offer(&mut self, offer: TransferOffer) -> Vec<Action> {
        if self.state != TransferState::Idle {
            let mut actions = vec![Action::RelayResponse {
                accepted: false,
                reason: Some(RejectReason::Busy),
            }];
            if self.state.is_active() {
                actions.extend(self.fail(TransferError::HandshakeBusy));
            }
            return actions;
        }
        match self.handshake.on_offer(offer) {
            OfferDecision::Pending(offer) => vec![Action::Notify(Notice::OfferReceived(offer))],
            OfferDecision::AutoRejected { reason, error } => vec![
                Action::RelayResponse {
                    accepted: false,
                    reason: Some(reason),
                },
                Action::Notify(Notice::OfferRefused {
                    reason,
                    message: error,
                }),
            ],
        }
    }

    /// The user accepted the pending offer. `Idle -> Receiving`.
    pub fn accept(&mut self) -> Result<Vec<Action>> {
        if self.state != TransferState::Idle {
            return Err(TransferError::HandshakeBusy);
        }
        let offer = self.handshake.accept()?;
        self.reassembly.reset();
        self.session = Some(TransferSession::new(offer, &self.config));
        self.transition(TransferState::Receiving);
        Ok(vec![
            Action::RelayResponse {
                accepted: true,
                reason: None,
            },
            Action::OpenChannel {
                role: ChannelRole::Responder,
                after: Duration::ZERO,
            },
        ])
    }

    /// The user declined the pending offer.
    pub fn reject(&mut self) -> Result<Vec<Action>> {
        self.handshake.reject()?;
        Ok(vec![Action::RelayResponse {
            accepted: false,
            reason: Some(RejectReason::Declined),
        }])
    }

    /// Any inbound channel message.
    pub fn on_channel_message(&mut self, payload: ChannelPayload) -> Vec<Action> {
        match payload {
            ChannelPayload::Text(text) => self.on_control_text(&text),
            ChannelPayload::Binary(bytes) => self.on_chunk_frame(&bytes),
        }
    }

    pub fn on_control_text(&mut self, text: &str) -> Vec<Action> {
        match ControlMessage::from_json(text) {
            Ok(msg) => self.on_control(msg),
            Err(e) => self.fail_if_active(TransferError::MalformedMessage(e.to_string())),
        }
    }

    pub fn on_control(&mut self, msg: ControlMessage) -> Vec<Action> {
        match msg {
            ControlMessage::Cancel { reason } => {
                self.fail_if_active(TransferError::PeerCancelled(reason))
            }
            ControlMessage::FileInfo(info) => {
                if self.state != TransferState::Receiving {
                    return self.fail_if_active(TransferError::MalformedMessage(
                        "file-info outside a receive".into(),
                    ));
                }
                if let Some(s) = &self.session {
                    if info.file_size != s.offer.file_size
                        || info.total_chunks != s.offer.total_chunks
                    {
                        return self.fail(TransferError::MalformedMessage(
                            "file-info does not match the accepted offer".into(),
                        ));
                    }
                }
                if let Some(s) = self.session.as_mut() {
                    s.completed_chunks = 0;
                    s.bytes_transferred = 0;
                }
                match self.reassembly.on_file_info(info) {
                    Ok(()) => Vec::new(),
                    Err(e) => self.fail(e),
                }
            }
            ControlMessage::TransferComplete { total_chunks } => match self.state {
                TransferState::Completed => Vec::new(),
                TransferState::Receiving => match self.reassembly.on_transfer_complete(total_chunks)
                {
                    Ok(()) => Vec::new(),
                    Err(e) => self.fail(e),
                },
                _ => Vec::new(),
            },
        }
    }

    /// One binary chunk frame.
    pub fn on_chunk_frame(&mut self, bytes: &[u8]) -> Vec<Action> {
        if self.state != TransferState::Receiving {
            tracing::debug!(len = bytes.len(), state = ?self.state, "dropping chunk outside a receive");
            return Vec::new();
        }
        let frame = match wire::decode_message(bytes) {
            Ok(f) => f,
            Err(e) => return self.fail(e.into()),
        };
        match self.reassembly.on_chunk(frame) {
            Ok(ChunkReceiveResult::InProgress { received, .. }) => {
                let bytes_received = self.reassembly.progress().bytes_received;
                if let Some(s) = self.session.as_mut() {
                    s.completed_chunks = received;
                    s.bytes_transferred = bytes_received;
                }
                Vec::new()
            }
            Ok(ChunkReceiveResult::Complete(file)) => {
                if let Some(s) = self.session.as_mut() {
                    s.completed_chunks = s.offer.total_chunks;
                    s.bytes_transferred = file.bytes.len() as u64;
                }
                let file_name = file.file_name.clone();
                self.handshake.reset();
                self.transition(TransferState::Completed);
                vec![
                    Action::Deliver(file),
                    Action::Notify(Notice::Completed { file_name }),
                ]
            }
            Err(e) => self.fail(e),
        }
    }

    // ---- both sides ----

    /// Channel lifecycle. `Failed` is retried with backoff; a clean `Closed`
    /// mid-transfer is an error.
    pub fn on_channel_event(&mut self, event: ChannelEvent) -> Vec<Action> {
        let role = match self.state {
            TransferState::Sending => ChannelRole::Initiator,
            TransferState::Receiving => ChannelRole::Responder,
            _ => {
                tracing::debug!(?event, state = ?self.state, "channel event outside a transfer");
                return Vec::new();
            }
        };
        match event {
            ChannelEvent::Opened => match (&self.state, &self.session) {
                (TransferState::Sending, Some(s)) => {
                    let mut actions = Vec::new();
                    if s.channel_attempts > 0 {
                        tracing::info!(attempt = s.channel_attempts, "channel reopened; restarting from chunk 0");
                    }
                    actions.push(Action::StartSending(s.offer.clone()));
                    actions
                }
                _ => Vec::new(),
            },
            ChannelEvent::Closed => self.fail(TransferError::ChannelClosedUnexpectedly),
            ChannelEvent::Failed => {
                let Some(s) = self.session.as_mut() else {
                    return self.fail(TransferError::ChannelFailed);
                };
                let mut actions = Vec::new();
                if role == ChannelRole::Initiator {
                    actions.push(Action::AbortSending);
                }
                match s.backoff.next_delay() {
                    Some(delay) => {
                        s.channel_attempts = s.backoff.attempts();
                        let attempt = s.channel_attempts;
                        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "peer channel failed; retrying");
                        actions.push(Action::Notify(Notice::Retrying { attempt, delay }));
                        actions.push(Action::OpenChannel { role, after: delay });
                        actions
                    }
                    None => {
                        let attempts = s.backoff.attempts();
                        self.fail(TransferError::RetriesExhausted { attempts })
                    }
                }
            }
        }
    }

    /// The other participant left the session.
    pub fn on_peer_left(&mut self) -> Vec<Action> {
        if self.state.is_active() {
            return self.fail(TransferError::PeerLeft);
        }
        if !self.handshake.is_idle() {
            self.handshake.reset();
        }
        vec![Action::Notify(Notice::PeerLeft)]
    }

    /// Back to `Idle` from any state. Tears down the channel, cancels chunk work
    /// and drops all chunk buffers.
    pub fn reset(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == TransferState::Sending {
            actions.push(Action::AbortSending);
        }
        if self.state != TransferState::Idle {
            actions.push(Action::CloseChannel);
        }
        self.handshake.reset();
        self.reassembly.reset();
        self.session = None;
        self.transition(TransferState::Idle);
        actions
    }

    pub fn status(&self) -> TransferStatus {
        let progress = match (&self.state, &self.session) {
            (TransferState::Receiving, Some(_)) => {
                Progress::from_receiver(&self.reassembly.progress())
            }
            (_, Some(s)) => Progress {
                bytes_done: s.bytes_transferred,
                total_bytes: s.offer.file_size,
                chunks_done: s.completed_chunks,
                total_chunks: s.offer.total_chunks,
                peak_throughput: s.peak_throughput,
                concurrency: s.current_concurrency,
                ..Progress::default()
            },
            _ => Progress::default(),
        };
        TransferStatus {
            state: self.state.clone(),
            file_name: self.session.as_ref().map(|s| s.offer.file_name.clone()),
            progress,
            channel_attempts: self.session.as_ref().map_or(0, |s| s.channel_attempts),
        }
    }

    fn fail_if_active(&mut self, err: TransferError) -> Vec<Action> {
        if self.state.is_active() {
            self.fail(err)
        } else {
            tracing::debug!(error = %err, state = ?self.state, "ignoring outside a transfer");
            Vec::new()
        }
    }

    /// Move to `Error`, releasing chunk state. The peer is told via `cancel`
    /// unless the channel itself is what broke.
    fn fail(&mut self, err: TransferError) -> Vec<Action> {
        let failure = Failure::from(&err);
        tracing::warn!(code = failure.code, error = %err, "transfer failed");
        let mut actions = Vec::new();
        let channel_in_use = matches!(
            self.state,
            TransferState::Sending | TransferState::Receiving
        );
        if self.state == TransferState::Sending {
            actions.push(Action::AbortSending);
        }
        if channel_in_use {
            let channel_broken = matches!(
                err,
                TransferError::ChannelFailed
                    | TransferError::ChannelClosedUnexpectedly
                    | TransferError::RetriesExhausted { .. }
                    | TransferError::PeerCancelled(_)
                    | TransferError::PeerLeft
            );
            if !channel_broken {
                actions.push(Action::SendControl(ControlMessage::Cancel {
                    reason: failure.code.to_string(),
                }));
            }
            actions.push(Action::CloseChannel);
        }
        self.handshake.reset();
        self.reassembly.reset();
        self.transition(TransferState::Error(failure.clone()));
        actions.push(Action::Notify(Notice::Failed(failure)));
        actions
    }
}
