//! Signaling server: newline-delimited JSON over TCP. Hosts the session
//! directory and forwards signals, offers and responses between paired clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use hop_core::directory::{LeaveOutcome, SessionDirectory};
use hop_core::relay::{self, Envelope};
use hop_core::{ClientMessage, DirectoryConfig, ParticipantId, ServerMessage, SessionCode, PROTOCOL_VERSION};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest accepted client line. Longer lines are refused before they are buffered.
const MAX_LINE_LEN: usize = 1024 * 1024;

pub type SharedState = Arc<Mutex<RelayState>>;

/// Counts reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStats {
    pub connected_participants: usize,
    pub active_sessions: usize,
}

/// Directory plus one outbound queue per connected client.
pub struct RelayState {
    directory: SessionDirectory,
    clients: HashMap<ParticipantId, mpsc::UnboundedSender<ServerMessage>>,
}

impl RelayState {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            directory: SessionDirectory::new(config),
            clients: HashMap::new(),
        }
    }

    pub fn shared(config: DirectoryConfig) -> SharedState {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Register a client and greet it with its id.
    pub fn connect(&mut self, tx: mpsc::UnboundedSender<ServerMessage>) -> ParticipantId {
        let id = ParticipantId::generate();
        self.clients.insert(id, tx);
        tracing::info!(participant = %id.short(), clients = self.clients.len(), "client connected");
        self.send(
            id,
            ServerMessage::Welcome {
                participant_id: id,
                protocol_version: PROTOCOL_VERSION,
            },
        );
        id
    }

    /// Drop a client; its peers hear `peer-left`.
    pub fn disconnect(&mut self, id: ParticipantId) {
        self.leave_current(id);
        self.clients.remove(&id);
        tracing::info!(participant = %id.short(), clients = self.clients.len(), "client disconnected");
    }

    fn send(&self, to: ParticipantId, msg: ServerMessage) {
        match self.clients.get(&to) {
            Some(tx) => {
                if tx.send(msg).is_err() {
                    tracing::debug!(participant = %to.short(), "client queue closed");
                }
            }
            None => tracing::debug!(participant = %to.short(), "no such client"),
        }
    }

    fn leave_current(&mut self, id: ParticipantId) {
        for (code, outcome) in self.directory.leave_all(id) {
            if let LeaveOutcome::PeerRemains(peer) = outcome {
                tracing::debug!(code = %code, "notifying remaining peer");
                self.send(peer, ServerMessage::PeerLeft { participant_id: id });
            }
        }
    }

    /// Apply one client message.
    pub fn handle(&mut self, from: ParticipantId, msg: ClientMessage, now: Instant) {
        match msg {
            ClientMessage::CreateSession => {
                self.leave_current(from);
                let reply = match self.directory.create_session(from, now) {
                    Ok(code) => ServerMessage::SessionCreated {
                        success: true,
                        code: Some(code.to_string()),
                        error: None,
                    },
                    Err(e) => ServerMessage::SessionCreated {
                        success: false,
                        code: None,
                        error: Some(e.to_string()),
                    },
                };
                self.send(from, reply);
            }
            ClientMessage::JoinSession { code } => self.join(from, &code, now),
            ClientMessage::LeaveSession => self.leave_current(from),
            ClientMessage::Signal { kind, payload } => {
                self.forward(from, Envelope::Signal { kind, payload }, now)
            }
            ClientMessage::TransferOffer(offer) => {
                self.forward(from, Envelope::TransferOffer(offer), now)
            }
            ClientMessage::TransferResponse { accepted, reason } => {
                self.forward(from, Envelope::TransferResponse { accepted, reason }, now)
            }
        }
    }

    fn join(&mut self, from: ParticipantId, raw: &str, now: Instant) {
        let failed = |code: Option<String>, error: String| ServerMessage::SessionJoined {
            success: false,
            code,
            error: Some(error),
        };
        let code = match SessionCode::parse(raw) {
            Ok(c) => c,
            Err(e) => {
                self.send(from, failed(None, e.to_string()));
                return;
            }
        };
        if self.directory.session_of(from).map(|s| &s.code) != Some(&code) {
            self.leave_current(from);
        }
        match self.directory.join_session(&code, from, now) {
            Ok(sender) => {
                self.send(
                    from,
                    ServerMessage::SessionJoined {
                        success: true,
                        code: Some(code.to_string()),
                        error: None,
                    },
                );
                if let Some(sender) = sender {
                    self.send(sender, ServerMessage::PeerJoined { participant_id: from });
                    self.send(from, ServerMessage::PeerJoined { participant_id: sender });
                }
            }
            Err(e) => self.send(from, failed(Some(code.to_string()), e.to_string())),
        }
    }

    fn forward(&mut self, from: ParticipantId, envelope: Envelope, now: Instant) {
        let Some(code) = self.directory.session_of(from).map(|s| s.code.clone()) else {
            self.send(
                from,
                ServerMessage::Error {
                    message: "not in a session".into(),
                },
            );
            return;
        };
        if let Some(fwd) = relay::relay(&mut self.directory, &code, from, envelope, now) {
            self.send(fwd.to, fwd.message);
        }
    }

    /// Expire idle sessions and tell whoever was still attached.
    pub fn sweep(&mut self, now: Instant) {
        for expired in self.directory.sweep(now) {
            for p in &expired.participants {
                self.send(
                    *p,
                    ServerMessage::SessionExpired {
                        code: expired.code.to_string(),
                    },
                );
            }
        }
    }

    pub fn stats(&self) -> HealthStats {
        HealthStats {
            connected_participants: self.clients.len(),
            active_sessions: self.directory.stats().active_sessions,
        }
    }
}

/// Accept signaling connections until the listener fails.
pub async fn run_relay(listener: TcpListener, state: SharedState) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "relay listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, state: SharedState) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let mut line = match serde_json::to_string(&msg) {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode server message");
                    continue;
                }
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let id = state.lock().await.connect(tx);
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let result = loop {
        let line = match lines.next().await {
            Some(Ok(l)) => l,
            None => break Ok(()),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!(participant = %id.short(), "client line too long; closing");
                state.lock().await.send(
                    id,
                    ServerMessage::Error {
                        message: "message too large".into(),
                    },
                );
                break Ok(());
            }
            Some(Err(LinesCodecError::Io(e))) => break Err(e),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut st = state.lock().await;
        match serde_json::from_str::<ClientMessage>(line) {
            Ok(msg) => st.handle(id, msg, Instant::now()),
            Err(e) => {
                tracing::warn!(participant = %id.short(), error = %e, "malformed client message");
                st.send(
                    id,
                    ServerMessage::Error {
                        message: format!("malformed message: {}", e),
                    },
                );
            }
        }
    };

    state.lock().await.disconnect(id);
    if let Err(e) = writer.await {
        tracing::debug!(participant = %id.short(), error = %e, "writer task failed");
    }
    result
}

/// Periodically expire idle sessions.
pub async fn run_sweeper(state: SharedState) {
    let period = state.lock().await.directory.config().sweep_interval();
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        state.lock().await.sweep(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hop_core::handshake::RejectReason;
    use hop_core::protocol::SignalKind;
    use hop_core::TransferOffer;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    struct Client {
        id: ParticipantId,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        fn connect(state: &mut RelayState) -> Self {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let id = state.connect(tx);
            assert!(matches!(rx.try_recv(), Ok(ServerMessage::Welcome { .. })));
            Client { id, rx }
        }

        fn next(&mut self) -> ServerMessage {
            self.rx.try_recv().expect("expected a message")
        }

        fn is_idle(&mut self) -> bool {
            self.rx.try_recv().is_err()
        }
    }

    fn created_code(msg: ServerMessage) -> String {
        match msg {
            ServerMessage::SessionCreated {
                success: true,
                code: Some(code),
                ..
            } => code,
            other => panic!("expected session-created, got {:?}", other),
        }
    }

    fn paired(state: &mut RelayState) -> (Client, Client, String) {
        let mut a = Client::connect(state);
        let mut b = Client::connect(state);
        let now = Instant::now();
        state.handle(a.id, ClientMessage::CreateSession, now);
        let code = created_code(a.next());
        state.handle(b.id, ClientMessage::JoinSession { code: code.clone() }, now);
        assert!(matches!(b.next(), ServerMessage::SessionJoined { success: true, .. }));
        assert_eq!(a.next(), ServerMessage::PeerJoined { participant_id: b.id });
        assert_eq!(b.next(), ServerMessage::PeerJoined { participant_id: a.id });
        (a, b, code)
    }

    #[test]
    fn create_join_and_signal() {
        let mut state = RelayState::new(DirectoryConfig::default());
        let (mut a, mut b, _) = paired(&mut state);
        let payload = serde_json::json!({"sdp": "v=0"});
        state.handle(
            a.id,
            ClientMessage::Signal {
                kind: SignalKind::Offer,
                payload: payload.clone(),
            },
            Instant::now(),
        );
        assert_eq!(
            b.next(),
            ServerMessage::Signal {
                from: a.id,
                kind: SignalKind::Offer,
                payload
            }
        );
        assert!(a.is_idle());
        assert_eq!(state.stats().active_sessions, 1);
        assert_eq!(state.stats().connected_participants, 2);
    }

    #[test]
    fn offer_and_response_are_relayed() {
        let mut state = RelayState::new(DirectoryConfig::default());
        let (mut a, mut b, _) = paired(&mut state);
        let offer = TransferOffer::for_file("a.txt", 10, "text/plain", u64::MAX).unwrap();
        state.handle(a.id, ClientMessage::TransferOffer(offer.clone()), Instant::now());
        assert_eq!(b.next(), ServerMessage::TransferOffer { from: a.id, offer });
        state.handle(
            b.id,
            ClientMessage::TransferResponse {
                accepted: false,
                reason: Some(RejectReason::Busy),
            },
            Instant::now(),
        );
        assert_eq!(
            a.next(),
            ServerMessage::TransferResponse {
                from: b.id,
                accepted: false,
                reason: Some(RejectReason::Busy)
            }
        );
    }

    #[test]
    fn third_client_cannot_join() {
        let mut state = RelayState::new(DirectoryConfig::default());
        let (_a, _b, code) = paired(&mut state);
        let mut c = Client::connect(&mut state);
        state.handle(c.id, ClientMessage::JoinSession { code }, Instant::now());
        match c.next() {
            ServerMessage::SessionJoined { success, error, .. } => {
                assert!(!success);
                assert_eq!(error.as_deref(), Some("session already has a receiver"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_codes_are_reported() {
        let mut state = RelayState::new(DirectoryConfig::default());
        let mut a = Client::connect(&mut state);
        state.handle(a.id, ClientMessage::JoinSession { code: "12ab".into() }, Instant::now());
        assert!(matches!(a.next(), ServerMessage::SessionJoined { success: false, code: None, .. }));
        state.handle(a.id, ClientMessage::JoinSession { code: "654321".into() }, Instant::now());
        match a.next() {
            ServerMessage::SessionJoined { success: false, error: Some(e), .. } => {
                assert_eq!(e, "session not found or expired")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn signal_without_session_is_an_error() {
        let mut state = RelayState::new(DirectoryConfig::default());
        let mut a = Client::connect(&mut state);
        state.handle(
            a.id,
            ClientMessage::Signal {
                kind: SignalKind::Answer,
                payload: serde_json::Value::Null,
            },
            Instant::now(),
        );
        assert!(matches!(a.next(), ServerMessage::Error { .. }));
    }

    #[test]
    fn disconnect_notifies_peer() {
        let mut state = RelayState::new(DirectoryConfig::default());
        let (mut a, b, _) = paired(&mut state);
        state.disconnect(b.id);
        assert_eq!(a.next(), ServerMessage::PeerLeft { participant_id: b.id });
        assert_eq!(state.stats().connected_participants, 1);
        assert_eq!(state.stats().active_sessions, 1);
        state.handle(a.id, ClientMessage::LeaveSession, Instant::now());
        assert_eq!(state.stats().active_sessions, 0);
    }

    #[test]
    fn idle_sessions_expire() {
        let mut state = RelayState::new(DirectoryConfig::default());
        let (mut a, mut b, code) = paired(&mut state);
        state.sweep(Instant::now() + Duration::from_secs(601));
        assert_eq!(a.next(), ServerMessage::SessionExpired { code: code.clone() });
        assert_eq!(b.next(), ServerMessage::SessionExpired { code });
        assert_eq!(state.stats().active_sessions, 0);
    }

    async fn read_msg(lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>) -> ServerMessage {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn tcp_pairing_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = RelayState::shared(DirectoryConfig::default());
        tokio::spawn(run_relay(listener, state.clone()));

        let (ar, mut aw) = TcpStream::connect(addr).await.unwrap().into_split();
        let (br, mut bw) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut a = BufReader::new(ar).lines();
        let mut b = BufReader::new(br).lines();
        assert!(matches!(read_msg(&mut a).await, ServerMessage::Welcome { .. }));
        assert!(matches!(read_msg(&mut b).await, ServerMessage::Welcome { .. }));

        aw.write_all(b"{\"type\":\"create-session\"}\n").await.unwrap();
        let code = created_code(read_msg(&mut a).await);
        bw.write_all(format!("{{\"type\":\"join-session\",\"code\":\"{}\"}}\n", code).as_bytes())
            .await
            .unwrap();
        assert!(matches!(read_msg(&mut b).await, ServerMessage::SessionJoined { success: true, .. }));
        assert!(matches!(read_msg(&mut a).await, ServerMessage::PeerJoined { .. }));
        assert!(matches!(read_msg(&mut b).await, ServerMessage::PeerJoined { .. }));

        bw.write_all(b"not json\n").await.unwrap();
        assert!(matches!(read_msg(&mut b).await, ServerMessage::Error { .. }));

        drop(bw);
        drop(b);
        assert!(matches!(read_msg(&mut a).await, ServerMessage::PeerLeft { .. }));
        assert_eq!(state.lock().await.stats().connected_participants, 1);
    }

    #[tokio::test]
    async fn overlong_line_is_refused_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = RelayState::shared(DirectoryConfig::default());
        tokio::spawn(run_relay(listener, state.clone()));

        let (r, mut w) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut lines = BufReader::new(r).lines();
        assert!(matches!(read_msg(&mut lines).await, ServerMessage::Welcome { .. }));

        // No newline: the relay must give up at the limit instead of buffering on.
        w.write_all(&vec![b'a'; MAX_LINE_LEN + 1]).await.unwrap();
        assert_eq!(
            read_msg(&mut lines).await,
            ServerMessage::Error {
                message: "message too large".into()
            }
        );
        assert!(lines.next_line().await.unwrap().is_none());
        assert_eq!(state.lock().await.stats().connected_participants, 0);
    }
}
