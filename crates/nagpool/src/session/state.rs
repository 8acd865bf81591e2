use std::fmt;

use crate::error::ProtocolError;
use crate::protocol::CommandId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Protocol state of one worker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `version` sent, waiting for the peer's answer
    Negotiating,
    /// Version accepted, waiting for the pattern push
    Negotiated,
    SendingPatterns,
    /// Patterns loaded, no board size yet
    Available,
    Initializing,
    /// Idle and dispatchable
    Ready,
    /// Running a bound task
    Thinking,
    /// `abort` sent, waiting for the acknowledgment
    Aborting,
    Disconnecting,
    Disconnected,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnecting | SessionState::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Negotiating => "negotiating",
            SessionState::Negotiated => "negotiated",
            SessionState::SendingPatterns => "sending_patterns",
            SessionState::Available => "available",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Thinking => "thinking",
            SessionState::Aborting => "aborting",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// What `initialize` did with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// `set_boardsize` is on the wire
    Sent,
    /// Session was busy; it aborts if needed and re-initializes on its own
    Deferred,
    /// The same size is already being applied
    InFlight,
    /// Not negotiated yet, or closing
    Ignored,
}

/// Why a session went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Protocol(ProtocolError),
    ApplicationFailure { id: CommandId, payload: String },
    PeerHangUp,
    TransportClosed,
    TransportError(String),
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Protocol(e) => write!(f, "protocol violation: {e}"),
            DisconnectReason::ApplicationFailure { id, payload } => {
                write!(f, "peer failed {id}: {payload}")
            }
            DisconnectReason::PeerHangUp => f.write_str("peer hung up"),
            DisconnectReason::TransportClosed => f.write_str("connection closed"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {e}"),
            DisconnectReason::Shutdown => f.write_str("shutdown"),
        }
    }
}
