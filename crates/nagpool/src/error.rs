//! Error types for the coordinator core
//!
//! None of these reach the search logic: session-level failures are handled by
//! tearing the session down, and the coordinator API only reports "no result yet".

use crate::nag::NagId;
use crate::session::{SessionId, SessionState};

/// Malformed or unexpected wire traffic
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed command id: {0:?}")]
    MalformedId(String),

    #[error("malformed reply line: {0:?}")]
    MalformedReply(String),

    #[error("malformed command line: {0:?}")]
    MalformedCommand(String),

    #[error("invalid side: {0:?}")]
    InvalidSide(String),

    #[error("invalid point: {0:?}")]
    InvalidPoint(String),

    #[error("invalid ordering seed: {0:?}")]
    InvalidSeed(String),

    #[error("malformed search result: {0:?}")]
    MalformedSearchResult(String),

    #[error("protocol version mismatch: expected {expected:?}, peer reports {actual:?}")]
    VersionMismatch { expected: String, actual: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{name}: unexpected argument count {actual}")]
    Arity { name: String, actual: usize },
}

/// Binding record violations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("{0} already has a bound task")]
    SessionBusy(SessionId),

    #[error("{0} is already bound to {1}")]
    NagBusy(NagId, SessionId),
}

/// Rejections of session operations
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("{op} not permitted in state {state}")]
    InvalidState { op: &'static str, state: SessionState },

    #[error("board size mismatch: session has {session:?}, requested {requested}")]
    BoardSizeMismatch { session: Option<u32>, requested: u32 },

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("session closed while sending")]
    Closed,
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
