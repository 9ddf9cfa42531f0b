use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Longest session id accepted from a transport.
pub const MAX_SESSION_ID_LEN: usize = 256;

const FINGERPRINT_HEX_CHARS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session id is missing")]
    MissingSessionId,
    #[error("invalid session id: {reason}")]
    InvalidSessionId { reason: &'static str },
    #[error("credential must not be empty")]
    EmptyCredential,
}

/// Opaque identifier of one client connection, as handed over by the transport.
///
/// Only visible ASCII (`0x21..=0x7E`) is accepted, up to [`MAX_SESSION_ID_LEN`]
/// bytes. Anything else is rejected before it can reach the credential store.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if raw.is_empty() {
            return Err(SessionError::InvalidSessionId {
                reason: "must not be empty",
            });
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::InvalidSessionId {
                reason: "longer than 256 bytes",
            });
        }
        if !raw.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(SessionError::InvalidSessionId {
                reason: "must only contain visible ASCII characters",
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Parse an optional transport-supplied id; absence is its own error.
    pub fn from_context(raw: Option<&str>) -> Result<Self, SessionError> {
        match raw {
            Some(raw) => Self::parse(raw),
            None => Err(SessionError::MissingSessionId),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 prefix, safe to put in logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(FINGERPRINT_HEX_CHARS);
        digest
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.fingerprint())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The caller's API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Result<Self, SessionError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(SessionError::EmptyCredential);
        }
        Ok(Self(raw))
    }

    /// Raw secret, for attaching to exactly one outgoing request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
