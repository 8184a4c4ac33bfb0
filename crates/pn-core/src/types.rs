//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, no connection attempted
    Idle,
    /// Transport is being opened
    Connecting,
    /// Handshake sent, waiting for the server's reply
    AwaitingHandshakeAck,
    /// Handshake complete, requests may be sent
    Ready,
    /// Terminal; a new session is needed to reconnect
    Closed,
}

impl SessionState {
    /// Whether the session has reached its terminal state
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::AwaitingHandshakeAck => write!(f, "awaiting-handshake-ack"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Result code of the server's handshake reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeCode {
    /// 200: accepted
    Ok,
    /// 500: generic failure
    Fail,
    /// 501: client version too old
    OldClient,
    /// Any other code
    Other(i64),
}

impl HandshakeCode {
    /// Map a numeric code
    pub fn from_code(code: i64) -> Self {
        match code {
            200 => HandshakeCode::Ok,
            500 => HandshakeCode::Fail,
            501 => HandshakeCode::OldClient,
            other => HandshakeCode::Other(other),
        }
    }

    /// Numeric value on the wire
    pub fn code(&self) -> i64 {
        match self {
            HandshakeCode::Ok => 200,
            HandshakeCode::Fail => 500,
            HandshakeCode::OldClient => 501,
            HandshakeCode::Other(code) => *code,
        }
    }

    /// Human-readable reason for a rejected handshake
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeCode::Ok => "ok",
            HandshakeCode::OldClient => "client version not fulfilled",
            HandshakeCode::Fail | HandshakeCode::Other(_) => "handshake fail",
        }
    }
}

impl fmt::Display for HandshakeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(format!("{}", SessionState::Ready), "ready");
        assert_eq!(
            format!("{}", SessionState::AwaitingHandshakeAck),
            "awaiting-handshake-ack"
        );
        assert!(SessionState::Closed.is_closed());
        assert!(!SessionState::Ready.is_closed());
    }

    #[test]
    fn test_handshake_code_mapping() {
        assert_eq!(HandshakeCode::from_code(200), HandshakeCode::Ok);
        assert_eq!(HandshakeCode::from_code(501), HandshakeCode::OldClient);
        assert_eq!(HandshakeCode::from_code(404), HandshakeCode::Other(404));
        assert_eq!(HandshakeCode::Other(404).code(), 404);
        assert_eq!(HandshakeCode::Fail.reason(), "handshake fail");
        assert_eq!(HandshakeCode::OldClient.to_string(), "501");
    }
}
