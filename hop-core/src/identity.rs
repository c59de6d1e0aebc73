//! Participant identity and pairing codes.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of decimal digits in a pairing code.
pub const CODE_LEN: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

/// Relay-assigned identity of one connected client. Opaque to everything but the relay.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(uuid::Uuid);

impl ParticipantId {
    /// Fresh random identity (UUID v4).
    pub fn generate() -> Self {
        ParticipantId(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// First 8 hex digits, for log lines and "Peer 1a2b3c4d" style labels.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short human-readable pairing code: exactly six ASCII digits, leading zeros kept.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Draw a uniformly random code from the full 000000..=999999 space.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let n = rng.gen_range(0..CODE_SPACE);
        SessionCode(format!("{:0width$}", n, width = CODE_LEN))
    }

    /// Parse user input. Surrounding whitespace is ignored; anything else must be digits.
    pub fn parse(s: &str) -> Result<Self, InvalidCode> {
        let s = s.trim();
        if s.len() != CODE_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidCode(s.to_string()));
        }
        Ok(SessionCode(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionCode {
    type Err = InvalidCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionCode::parse(s)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = InvalidCode;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        SessionCode::parse(&s)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

/// Input that is not a six-digit code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session code {0:?}: expected 6 digits")]
pub struct InvalidCode(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn random_code_is_six_digits() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = SessionCode::random(&mut rng);
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn random_code_keeps_leading_zeros() {
        let mut rng = StepRng::new(0, 0);
        let code = SessionCode::random(&mut rng);
        assert_eq!(code.as_str(), "000000");
    }

    #[test]
    fn parse_trims_and_validates() {
        assert_eq!(SessionCode::parse(" 042137 ").unwrap().as_str(), "042137");
        assert!(SessionCode::parse("12345").is_err());
        assert!(SessionCode::parse("1234567").is_err());
        assert!(SessionCode::parse("12a456").is_err());
        assert!(SessionCode::parse("").is_err());
    }

    #[test]
    fn code_serde_rejects_garbage() {
        let ok: SessionCode = serde_json::from_str("\"123456\"").unwrap();
        assert_eq!(ok.as_str(), "123456");
        assert!(serde_json::from_str::<SessionCode>("\"abc\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"123456\"");
    }

    #[test]
    fn participant_ids_are_unique() {
        let a = ParticipantId::generate();
        let b = ParticipantId::generate();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }
}
