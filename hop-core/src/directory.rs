//! Session directory: pairing codes to two-party sessions, with idle expiry.
//! Pure state; the relay daemon owns one behind a mutex and passes `now` in.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::DirectoryConfig;
use crate::error::{Result, TransferError};
use crate::identity::{ParticipantId, SessionCode};

/// Collisions tolerated while drawing a fresh code before giving up.
pub const MAX_CODE_ATTEMPTS: u32 = 32;

/// One pairing: exactly one sender, at most one receiver.
#[derive(Debug, Clone)]
pub struct Session {
    pub code: SessionCode,
    pub sender: Option<ParticipantId>,
    pub receiver: Option<ParticipantId>,
    pub created_at: Instant,
    pub last_activity_at: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity_at) > idle_timeout
    }

    fn is_empty(&self) -> bool {
        self.sender.is_none() && self.receiver.is_none()
    }

    fn peer_of(&self, participant: ParticipantId) -> Option<ParticipantId> {
        if self.sender == Some(participant) {
            self.receiver
        } else if self.receiver == Some(participant) {
            self.sender
        } else {
            None
        }
    }

    fn contains(&self, participant: ParticipantId) -> bool {
        self.sender == Some(participant) || self.receiver == Some(participant)
    }
}

/// Result of a participant leaving a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Both slots empty; the session is gone.
    Removed,
    /// The other side is still attached and should hear `peer-left`.
    PeerRemains(ParticipantId),
    /// The participant was not in this session.
    NotMember,
}

/// A session removed by `sweep`, with whoever was still attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSession {
    pub code: SessionCode,
    pub participants: Vec<ParticipantId>,
}

/// Counts for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectoryStats {
    pub active_sessions: usize,
    pub participants: usize,
}

/// All live sessions, keyed by code.
#[derive(Debug)]
pub struct SessionDirectory {
    sessions: HashMap<SessionCode, Session>,
    config: DirectoryConfig,
}

impl SessionDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Open a session with `sender` and a fresh random code.
    pub fn create_session(&mut self, sender: ParticipantId, now: Instant) -> Result<SessionCode> {
        self.create_session_with(&mut rand::thread_rng(), sender, now)
    }

    /// Same as `create_session` with a caller-supplied RNG.
    pub fn create_session_with<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        sender: ParticipantId,
        now: Instant,
    ) -> Result<SessionCode> {
        let idle = self.config.idle_timeout();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = SessionCode::random(rng);
            if let Some(existing) = self.sessions.get(&code) {
                if !existing.is_expired(now, idle) {
                    tracing::debug!(code = %code, "session code collision");
                    continue;
                }
                tracing::debug!(code = %code, "reusing code of expired session");
            }
            self.sessions.insert(
                code.clone(),
                Session {
                    code: code.clone(),
                    sender: Some(sender),
                    receiver: None,
                    created_at: now,
                    last_activity_at: now,
                },
            );
            tracing::info!(code = %code, sender = %sender.short(), "session created");
            return Ok(code);
        }
        tracing::warn!(attempts = MAX_CODE_ATTEMPTS, "no free session code");
        Err(TransferError::Exhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    /// Attach `participant` as the receiver. Returns the sender so the relay can notify it.
    pub fn join_session(
        &mut self,
        code: &SessionCode,
        participant: ParticipantId,
        now: Instant,
    ) -> Result<Option<ParticipantId>> {
        let idle = self.config.idle_timeout();
        let session = match self.sessions.get_mut(code) {
            Some(s) if !s.is_expired(now, idle) => s,
            Some(_) => {
                self.sessions.remove(code);
                return Err(TransferError::SessionNotFound);
            }
            None => return Err(TransferError::SessionNotFound),
        };
        if session.sender == Some(participant) {
            return Err(TransferError::SessionFull);
        }
        match session.receiver {
            Some(existing) if existing != participant => return Err(TransferError::SessionFull),
            _ => {}
        }
        session.receiver = Some(participant);
        session.last_activity_at = now;
        tracing::info!(code = %code, receiver = %participant.short(), "session joined");
        Ok(session.sender)
    }

    /// Clear `participant`'s slot; drop the session once both slots are empty.
    pub fn leave(&mut self, code: &SessionCode, participant: ParticipantId) -> LeaveOutcome {
        let Some(session) = self.sessions.get_mut(code) else {
            return LeaveOutcome::NotMember;
        };
        if session.sender == Some(participant) {
            session.sender = None;
        } else if session.receiver == Some(participant) {
            session.receiver = None;
        } else {
            return LeaveOutcome::NotMember;
        }
        if session.is_empty() {
            self.sessions.remove(code);
            tracing::info!(code = %code, "session closed");
            return LeaveOutcome::Removed;
        }
        let remaining = session.sender.or(session.receiver);
        tracing::info!(code = %code, participant = %participant.short(), "participant left");
        match remaining {
            Some(peer) => LeaveOutcome::PeerRemains(peer),
            None => LeaveOutcome::Removed,
        }
    }

    /// Leave every session `participant` occupies (client disconnect).
    pub fn leave_all(&mut self, participant: ParticipantId) -> Vec<(SessionCode, LeaveOutcome)> {
        let codes: Vec<SessionCode> = self
            .sessions
            .values()
            .filter(|s| s.contains(participant))
            .map(|s| s.code.clone())
            .collect();
        codes
            .into_iter()
            .map(|code| {
                let outcome = self.leave(&code, participant);
                (code, outcome)
            })
            .collect()
    }

    pub fn touch(&mut self, code: &SessionCode, now: Instant) {
        if let Some(s) = self.sessions.get_mut(code) {
            s.last_activity_at = now;
        }
    }

    /// Remove sessions idle beyond the timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<ExpiredSession> {
        let idle = self.config.idle_timeout();
        let mut expired = Vec::new();
        self.sessions.retain(|code, s| {
            if !s.is_expired(now, idle) {
                return true;
            }
            expired.push(ExpiredSession {
                code: code.clone(),
                participants: s.sender.into_iter().chain(s.receiver).collect(),
            });
            false
        });
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired idle sessions");
        }
        expired
    }

    /// The other participant in `code`, if both are attached.
    pub fn peer_of(&self, code: &SessionCode, participant: ParticipantId) -> Option<ParticipantId> {
        self.sessions.get(code)?.peer_of(participant)
    }

    /// The session `participant` currently belongs to.
    pub fn session_of(&self, participant: ParticipantId) -> Option<&Session> {
        self.sessions.values().find(|s| s.contains(participant))
    }

    pub fn get(&self, code: &SessionCode) -> Option<&Session> {
        self.sessions.get(code)
    }

    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            active_sessions: self.sessions.len(),
            participants: self
                .sessions
                .values()
                .map(|s| s.sender.is_some() as usize + s.receiver.is_some() as usize)
                .sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
