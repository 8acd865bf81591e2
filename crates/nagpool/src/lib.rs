//! Distributed speculative subtree search
//!
//! The search logic asks the [`Coordinator`] for a batch of [`Nag`]s at a
//! promising node. Each one is sent to an idle remote worker, which replays the
//! position and searches it with its own move-ordering seed. Results are polled
//! per generation (start depth); aborting a generation invalidates everything
//! it created, whether finished, queued or still running.
//!
//! This crate is transport-agnostic. Connections plug in through
//! [`LineTransport`] and [`LineHandler`]; worker processes embed [`peer`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod nag;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::CoordinatorConfig;
pub use coordinator::{BatchRequest, Coordinator, MIN_REMAINING_DEPTH, PoolStatus};
pub use error::{BindError, ProtocolError, SessionError};
pub use nag::{Move, Nag, NagId, NagResult, OrderingSeed, Point, PositionSnapshot, Side, Window};
pub use peer::{PeerExit, PeerHandle, PeerRuntime, Searcher};
pub use protocol::PatternSet;
pub use session::{SessionId, SessionState, WorkerSession};
pub use transport::{LineHandler, LineTransport};
