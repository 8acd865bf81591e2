//! Coordinator-side view of one connected worker
//!
//! A [`WorkerSession`] drives its peer through negotiation, pattern loading,
//! board initialization and task batches. Every outbound batch gets a fresh
//! command number; only replies carrying the outstanding number move the state
//! machine, so late or duplicated peer output is harmless.
//!
//! The session never calls into the coordinator while its lock is held. State
//! changes the coordinator cares about are posted to its event queue instead.

mod state;

pub use state::{DisconnectReason, InitOutcome, SessionId, SessionState};

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::coordinator::binding::Bindings;
use crate::coordinator::events::Event;
use crate::error::{ProtocolError, SessionError, SessionResult};
use crate::nag::Nag;
use crate::protocol::{self, Command, CommandId, CommandName, PatternSet, Reply, Status};
use crate::transport::{LineHandler, LineTransport};

/// Sequence numbers of the dispatch batch. They are fixed so that the search
/// step is always `.6`, whether or not a move history is replayed.
mod step {
    pub const CLEAR_BOARD: u32 = 1;
    pub const PLAY_SEQUENCE: u32 = 2;
    pub const SET_DEPTH: u32 = 3;
    pub const SET_ALPHA_BETA: u32 = 4;
    pub const SET_PERMUTATION: u32 = 5;
    pub const SEARCH: u32 = 6;
}

type Step = (u32, CommandName, Vec<String>);

struct SessionInner {
    state: SessionState,
    command_number: u32,
    /// Sequence number of the final synchronous step of the outstanding batch
    last_sequence: u32,
    /// Board size the peer acknowledged last
    board_size: Option<u32>,
    requested_board_size: Option<u32>,
    /// Board reset that arrived while busy, applied on the way back to `Ready`
    deferred_board_size: Option<u32>,
}

pub struct WorkerSession {
    id: SessionId,
    transport: Arc<dyn LineTransport>,
    events: Sender<Event>,
    bindings: Arc<Bindings>,
    protocol_version: Arc<str>,
    inner: Mutex<SessionInner>,
}

impl WorkerSession {
    pub(crate) fn new(
        id: SessionId,
        transport: Arc<dyn LineTransport>,
        events: Sender<Event>,
        bindings: Arc<Bindings>,
        protocol_version: Arc<str>,
    ) -> Self {
        Self {
            id,
            transport,
            events,
            bindings,
            protocol_version,
            inner: Mutex::new(SessionInner {
                state: SessionState::Negotiating,
                command_number: 0,
                last_sequence: 0,
                board_size: None,
                requested_board_size: None,
                deferred_board_size: None,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        self.transport.peer()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn board_size(&self) -> Option<u32> {
        self.inner.lock().board_size
    }

    /// Number of the outstanding command batch
    pub fn command_number(&self) -> u32 {
        self.inner.lock().command_number
    }

    pub fn bound_nag(&self) -> Option<Arc<Nag>> {
        self.bindings.nag_of(self.id)
    }

    /// Opens negotiation with a `version` query.
    pub(crate) fn connect(&self) {
        let mut inner = self.inner.lock();
        inner.state = SessionState::Negotiating;
        log::info!("{} ({}): connected, negotiating", self.id, self.peer());
        self.send_batch(&mut inner, vec![(1, CommandName::Version, Vec::new())]);
    }

    /// Pushes the shared pattern set. Only valid right after negotiation.
    pub fn send_patterns(&self, patterns: &PatternSet) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Negotiated {
            return Err(SessionError::InvalidState {
                op: "send_patterns",
                state: inner.state,
            });
        }
        inner.state = SessionState::SendingPatterns;
        let steps = vec![
            (1, CommandName::ClearPatterns, Vec::new()),
            (2, CommandName::AddPatterns, vec![patterns.encode()]),
        ];
        self.send_or_closed(&mut inner, steps)
    }

    /// Resets the peer's board to `board_size`.
    ///
    /// A thinking session aborts first and re-initializes by itself once the
    /// abort is acknowledged.
    pub fn initialize(&self, board_size: u32) -> InitOutcome {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Available | SessionState::Ready => {
                if self.begin_initialize(&mut inner, board_size) {
                    InitOutcome::Sent
                } else {
                    InitOutcome::Ignored
                }
            }
            SessionState::Thinking => {
                inner.deferred_board_size = Some(board_size);
                self.abort_locked(&mut inner);
                InitOutcome::Deferred
            }
            SessionState::Initializing if inner.requested_board_size == Some(board_size) => {
                inner.deferred_board_size = None;
                InitOutcome::InFlight
            }
            SessionState::Aborting | SessionState::Initializing => {
                inner.deferred_board_size = Some(board_size);
                InitOutcome::Deferred
            }
            _ => InitOutcome::Ignored,
        }
    }

    /// Binds `nag` to this session and sends the search batch.
    pub fn start(&self, nag: Arc<Nag>, board_size: u32) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Ready {
            return Err(SessionError::InvalidState {
                op: "start",
                state: inner.state,
            });
        }
        if inner.board_size != Some(board_size) {
            return Err(SessionError::BoardSizeMismatch {
                session: inner.board_size,
                requested: board_size,
            });
        }
        self.bindings.bind(self.id, Arc::clone(&nag))?;
        inner.state = SessionState::Thinking;

        let window = nag.narrowed_window();
        let mut steps: Vec<Step> = Vec::with_capacity(6);
        steps.push((step::CLEAR_BOARD, CommandName::ClearBoard, Vec::new()));
        if !nag.history().is_empty() {
            steps.push((
                step::PLAY_SEQUENCE,
                CommandName::PlaySequence,
                protocol::history_args(nag.history()),
            ));
        }
        steps.push((step::SET_DEPTH, CommandName::SetDepth, vec![nag.depth().to_string()]));
        steps.push((
            step::SET_ALPHA_BETA,
            CommandName::SetAlphaBeta,
            vec![window.alpha.to_string(), window.beta.to_string()],
        ));
        steps.push((
            step::SET_PERMUTATION,
            CommandName::SetPermutation,
            vec![nag.ordering_seed().to_string()],
        ));
        steps.push((step::SEARCH, CommandName::Search, vec![nag.side_to_move().to_string()]));

        log::debug!(
            "{}: starting {} (start_depth={} depth={} seed={})",
            self.id,
            nag.id(),
            nag.start_depth(),
            nag.depth(),
            nag.ordering_seed()
        );
        self.send_or_closed(&mut inner, steps)
    }

    /// Cancels the running task. The binding is dropped right away, so a result
    /// still in flight can no longer reach the inbox. No-op unless thinking.
    pub fn abort(&self) -> bool {
        let mut inner = self.inner.lock();
        self.abort_locked(&mut inner)
    }

    /// Orderly shutdown. `terminate` also asks the worker process to exit.
    pub fn disconnect(&self, terminate: bool) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        let name = if terminate {
            CommandName::Terminate
        } else {
            CommandName::Disconnect
        };
        inner.command_number += 1;
        let line = Command::new(CommandId::new(inner.command_number, 1), name, Vec::new()).encode();
        if let Err(e) = self.transport.send_line(&line) {
            log::debug!("{}: could not send {name}: {e}", self.id);
        }
        self.teardown(&mut inner, DisconnectReason::Shutdown);
    }

    fn abort_locked(&self, inner: &mut SessionInner) -> bool {
        if inner.state != SessionState::Thinking {
            return false;
        }
        if let Some(nag) = self.bindings.release_session(self.id) {
            log::debug!("{}: aborting {}", self.id, nag.id());
        }
        inner.state = SessionState::Aborting;
        self.send_batch(inner, vec![(1, CommandName::Abort, Vec::new())]);
        true
    }

    fn begin_initialize(&self, inner: &mut SessionInner, board_size: u32) -> bool {
        inner.state = SessionState::Initializing;
        inner.requested_board_size = Some(board_size);
        self.send_batch(inner, vec![(1, CommandName::SetBoardsize, vec![board_size.to_string()])])
    }

    /// Entered after a completed, failed or aborted task and after a board reset.
    fn settle_ready(&self, inner: &mut SessionInner) {
        if let Some(board_size) = inner.deferred_board_size.take() {
            self.begin_initialize(inner, board_size);
            return;
        }
        inner.state = SessionState::Ready;
        self.notify(Event::Ready(self.id));
    }

    fn send_batch(&self, inner: &mut SessionInner, steps: Vec<Step>) -> bool {
        inner.command_number += 1;
        inner.last_sequence = steps.last().map_or(0, |(sequence, ..)| *sequence);
        for (sequence, name, args) in steps {
            let line =
                Command::new(CommandId::new(inner.command_number, sequence), name, args).encode();
            log::trace!("{} >> {line}", self.id);
            if let Err(e) = self.transport.send_line(&line) {
                self.teardown(inner, DisconnectReason::TransportError(e.to_string()));
                return false;
            }
        }
        true
    }

    fn send_or_closed(&self, inner: &mut SessionInner, steps: Vec<Step>) -> SessionResult<()> {
        if self.send_batch(inner, steps) {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    fn teardown(&self, inner: &mut SessionInner, reason: DisconnectReason) {
        if inner.state.is_terminal() {
            return;
        }
        match reason {
            DisconnectReason::Shutdown
            | DisconnectReason::PeerHangUp
            | DisconnectReason::TransportClosed => {
                log::info!("{} ({}): disconnecting: {reason}", self.id, self.peer());
            }
            _ => log::warn!("{} ({}): disconnecting: {reason}", self.id, self.peer()),
        }
        inner.state = SessionState::Disconnecting;
        if let Some(nag) = self.bindings.release_session(self.id) {
            log::debug!("{}: dropping bound {}", self.id, nag.id());
        }
        self.transport.close();
        inner.state = SessionState::Disconnected;
        self.notify(Event::Disconnected(self.id));
    }

    fn notify(&self, event: Event) {
        if self.events.send(event).is_err() {
            log::debug!("{}: coordinator event queue closed", self.id);
        }
    }

    fn handle_reply(&self, inner: &mut SessionInner, reply: Reply) {
        if reply.is_hang_up() {
            self.teardown(inner, DisconnectReason::PeerHangUp);
            return;
        }
        if inner.state.is_terminal() {
            return;
        }
        if reply.id.command != inner.command_number {
            log::debug!(
                "{}: ignoring stale reply {} (outstanding command {})",
                self.id,
                reply.id,
                inner.command_number
            );
            return;
        }

        // any failed step, the asynchronous search included, needs a fresh negotiation
        if reply.status == Status::Failure {
            self.teardown(
                inner,
                DisconnectReason::ApplicationFailure {
                    id: reply.id,
                    payload: reply.payload,
                },
            );
            return;
        }

        let sequence = reply.id.sequence;
        match inner.state {
            SessionState::Negotiating => {
                let actual = reply.payload.trim();
                if actual == &*self.protocol_version {
                    inner.state = SessionState::Negotiated;
                    log::info!("{}: negotiated protocol {actual}", self.id);
                    self.notify(Event::Negotiated(self.id));
                } else {
                    let error = ProtocolError::VersionMismatch {
                        expected: self.protocol_version.to_string(),
                        actual: actual.to_string(),
                    };
                    self.teardown(inner, DisconnectReason::Protocol(error));
                }
            }
            SessionState::SendingPatterns if sequence == inner.last_sequence => {
                inner.state = SessionState::Available;
                self.notify(Event::Available(self.id));
            }
            SessionState::Initializing if sequence == inner.last_sequence => {
                inner.board_size = inner.requested_board_size.take();
                self.settle_ready(inner);
            }
            SessionState::Thinking if sequence == step::SEARCH && reply.asynchronous => {
                self.complete(inner, &reply.payload);
            }
            SessionState::Aborting if sequence == inner.last_sequence => {
                self.settle_ready(inner);
            }
            state => log::trace!("{}: ack {} in state {state}", self.id, reply.id),
        }
    }

    fn complete(&self, inner: &mut SessionInner, payload: &str) {
        let result = match protocol::parse_search_payload(payload) {
            Ok(result) => result,
            Err(e) => {
                self.teardown(inner, DisconnectReason::Protocol(e));
                return;
            }
        };
        match self.bindings.release_session(self.id) {
            Some(nag) => {
                if nag.set_result(result) {
                    log::debug!(
                        "{}: {} finished score={} move={}",
                        self.id,
                        nag.id(),
                        result.score,
                        result.best_move
                    );
                    self.notify(Event::Completed(nag));
                }
            }
            None => log::debug!("{}: search result without a bound task", self.id),
        }
        self.settle_ready(inner);
    }
}

impl LineHandler for WorkerSession {
    fn on_line(&self, line: &str) {
        log::trace!("{} << {line}", self.id);
        let parsed = Reply::parse(line);
        let mut inner = self.inner.lock();
        match parsed {
            Ok(reply) => self.handle_reply(&mut inner, reply),
            Err(e) => self.teardown(&mut inner, DisconnectReason::Protocol(e)),
        }
    }

    fn on_closed(&self) {
        let mut inner = self.inner.lock();
        self.teardown(&mut inner, DisconnectReason::TransportClosed);
    }
}
