//! Worker pool, task dispatch and generation tracking
//!
//! The coordinator is the only component that sees every session. It keeps
//! a FIFO of idle sessions and a pool of idle tasks, and pairs them whenever
//! either side changes. Completed tasks wait in an inbox until the search logic
//! polls for them by generation key (the start depth of the batch).
//!
//! Lock order: coordinator → session → bindings. Sessions report back through
//! [`events`], never by calling in here.

pub mod binding;
pub(crate) mod events;
pub mod generation;
pub mod inbox;

pub use binding::Bindings;
pub use generation::{Bucket, GenerationTable};
pub use inbox::ResultInbox;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::CoordinatorConfig;
use crate::error::SessionError;
use crate::nag::{Nag, NagTemplate, OrderingSeed, PositionSnapshot, Side, Window};
use crate::protocol::PatternSet;
use crate::session::{InitOutcome, SessionId, SessionState, WorkerSession};
use crate::transport::LineTransport;
use events::Event;

/// Batches are refused below this many remaining plies.
pub const MIN_REMAINING_DEPTH: u32 = 3;

/// Input of [`Coordinator::create_batch`]
#[derive(Debug, Clone)]
pub struct BatchRequest<'a> {
    pub snapshot: &'a PositionSnapshot,
    pub window: Window,
    /// Window sent to the workers; `None` means the full window
    pub narrowed: Option<Window>,
    pub side_to_move: Side,
    /// Ply of the requesting node; also the generation key
    pub current_depth: u32,
    pub max_depth: u32,
    /// Number of legal moves at the node, bounds the variant count
    pub legal_moves: usize,
    /// Upper bound on tasks per batch; 0 counts as 1
    pub cap: usize,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    pub sessions: usize,
    pub idle_sessions: usize,
    pub idle_nags: usize,
    pub bound: usize,
    pub inbox: usize,
    pub generations: usize,
    pub active: bool,
    pub board_size: Option<u32>,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sessions={} idle={} bound={} idle_nags={} inbox={} generations={} active={}",
            self.sessions,
            self.idle_sessions,
            self.bound,
            self.idle_nags,
            self.inbox,
            self.generations,
            self.active
        )?;
        if let Some(size) = self.board_size {
            write!(f, " board={size}")?;
        }
        Ok(())
    }
}

struct CoordinatorInner {
    sessions: HashMap<SessionId, Arc<WorkerSession>>,
    idle_sessions: VecDeque<SessionId>,
    idle_nags: Vec<Arc<Nag>>,
    generations: GenerationTable,
    inbox: ResultInbox,
    active: bool,
    board_size: Option<u32>,
    rng: Xoshiro256PlusPlus,
}

pub struct Coordinator {
    protocol_version: Arc<str>,
    patterns: Arc<PatternSet>,
    bindings: Arc<Bindings>,
    events: Sender<Event>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    next_session_id: AtomicU64,
    inner: Mutex<CoordinatorInner>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Creates a coordinator and starts its event pump.
    pub fn start(config: CoordinatorConfig, patterns: PatternSet) -> Arc<Self> {
        let (coordinator, events) = Self::detached(config, patterns);
        let pump = events::spawn_pump(Arc::downgrade(&coordinator), events);
        *coordinator.pump.lock() = Some(pump);
        coordinator
    }

    /// Coordinator without a pump; the caller applies the returned events.
    pub(crate) fn detached(
        config: CoordinatorConfig,
        patterns: PatternSet,
    ) -> (Arc<Self>, Receiver<Event>) {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let coordinator = Arc::new(Self {
            protocol_version: Arc::from(config.protocol_version.as_str()),
            patterns: Arc::new(patterns),
            bindings: Arc::new(Bindings::default()),
            events: events_tx,
            wake_tx,
            wake_rx,
            next_session_id: AtomicU64::new(1),
            inner: Mutex::new(CoordinatorInner {
                sessions: HashMap::new(),
                idle_sessions: VecDeque::new(),
                idle_nags: Vec::new(),
                generations: GenerationTable::default(),
                inbox: ResultInbox::default(),
                active: false,
                board_size: None,
                rng: config.rng(),
            }),
            pump: Mutex::new(None),
        });
        (coordinator, events_rx)
    }

    /// Registers a freshly accepted connection and opens negotiation.
    ///
    /// The returned session is the transport's [`LineHandler`](crate::transport::LineHandler);
    /// start delivering lines to it once this returns.
    pub fn admit(&self, transport: Arc<dyn LineTransport>) -> Arc<WorkerSession> {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(WorkerSession::new(
            id,
            transport,
            self.events.clone(),
            Arc::clone(&self.bindings),
            Arc::clone(&self.protocol_version),
        ));
        self.inner.lock().sessions.insert(id, Arc::clone(&session));
        session.connect();
        session
    }

    pub(crate) fn handle_event(&self, event: Event) {
        let mut inner = self.inner.lock();
        match event {
            Event::Negotiated(id) => {
                if let Some(session) = inner.sessions.get(&id) {
                    if let Err(e) = session.send_patterns(&self.patterns) {
                        log::warn!("{id}: pattern push failed: {e}");
                    }
                }
            }
            Event::Available(id) => {
                let Some(session) = inner.sessions.get(&id) else {
                    return;
                };
                if let (true, Some(board_size)) = (inner.active, inner.board_size) {
                    session.initialize(board_size);
                }
            }
            Event::Ready(id) => {
                let Some(session) = inner.sessions.get(&id) else {
                    return;
                };
                let idle = session.state() == SessionState::Ready
                    && self.bindings.nag_of(id).is_none()
                    && !inner.idle_sessions.contains(&id);
                if idle {
                    inner.idle_sessions.push_back(id);
                    self.dispatch_locked(&mut inner);
                }
            }
            Event::Completed(nag) => {
                log::debug!("{} arrived for generation {}", nag.id(), nag.start_depth());
                inner.inbox.push(nag);
                // a pending token already covers this arrival
                let _ = self.wake_tx.try_send(());
            }
            Event::Disconnected(id) => {
                if inner.sessions.remove(&id).is_some() {
                    inner.idle_sessions.retain(|idle| *idle != id);
                    log::info!("{id} left the pool ({} connected)", inner.sessions.len());
                }
            }
            Event::Shutdown => {}
        }
    }

    /// Pairs idle sessions with idle tasks until one side runs out.
    fn dispatch_locked(&self, inner: &mut CoordinatorInner) {
        let Some(board_size) = inner.board_size else {
            return;
        };
        while !inner.idle_sessions.is_empty() && !inner.idle_nags.is_empty() {
            let Some(id) = inner.idle_sessions.pop_front() else {
                break;
            };
            let Some(session) = inner.sessions.get(&id).cloned() else {
                continue;
            };
            let index = inner.rng.random_range(0..inner.idle_nags.len());
            let nag = inner.idle_nags.swap_remove(index);
            match session.start(Arc::clone(&nag), board_size) {
                Ok(()) => {}
                Err(SessionError::BoardSizeMismatch { session: size, requested }) => {
                    log::info!("{id}: board size {size:?} != {requested}, re-initializing");
                    inner.idle_nags.push(nag);
                    session.initialize(board_size);
                }
                Err(e) => {
                    log::debug!("{id}: start of {} rejected: {e}", nag.id());
                    inner.idle_nags.push(nag);
                }
            }
        }
    }

    /// Creates one generation of speculative tasks and dispatches them.
    ///
    /// Returns nothing when too few plies remain or no worker is idle.
    pub fn create_batch(&self, request: &BatchRequest<'_>) -> Vec<Arc<Nag>> {
        let remaining = request.max_depth.saturating_sub(request.current_depth);
        if remaining < MIN_REMAINING_DEPTH {
            log::debug!("batch refused: {remaining} plies remaining");
            return Vec::new();
        }

        let mut inner = self.inner.lock();
        let idle = inner.idle_sessions.len();
        if idle == 0 {
            return Vec::new();
        }
        let cap = request.cap.max(1);
        let variants = (idle - 1).min(request.legal_moves).min(cap - 1);

        let template = NagTemplate {
            window: request.window,
            narrowed: request.narrowed.unwrap_or(request.window),
            depth: remaining,
            start_depth: request.current_depth,
            side_to_move: request.side_to_move,
            history: Arc::from(request.snapshot.history.as_slice()),
            position_hash: request.snapshot.hash,
        };
        let nags: Vec<Arc<Nag>> = (0..=variants)
            .map(|_| Arc::new(Nag::from_template(&template, OrderingSeed::random(&mut inner.rng))))
            .collect();

        if inner
            .generations
            .replace(request.current_depth, Bucket::new(nags.clone()))
            .is_some()
        {
            log::debug!("generation {} replaced", request.current_depth);
        }
        inner.idle_nags.extend(nags.iter().cloned());
        log::debug!(
            "batch of {} for generation {} (depth {remaining})",
            nags.len(),
            request.current_depth
        );
        self.dispatch_locked(&mut inner);
        nags
    }

    /// Takes the earliest completed task of the current bucket for `key`.
    pub fn poll_result(&self, key: u32) -> Option<Arc<Nag>> {
        let mut inner = self.inner.lock();
        let CoordinatorInner {
            generations, inbox, ..
        } = &mut *inner;
        inbox.take_first(|nag| generations.is_current(key, nag.id()))
    }

    /// [`poll_result`](Self::poll_result), blocking up to `timeout` for arrivals.
    pub fn wait_result(&self, key: u32, timeout: Duration) -> Option<Arc<Nag>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(nag) = self.poll_result(key) {
                return Some(nag);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match self.wake_rx.recv_timeout(remaining) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => return self.poll_result(key),
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Receives one token per result arrival, coalesced while unconsumed.
    pub fn result_signal(&self) -> Receiver<()> {
        self.wake_rx.clone()
    }

    /// Invalidates generation `key` and cancels whatever of it is still running.
    pub fn abort(&self, key: u32) {
        let mut inner = self.inner.lock();
        let Some(bucket) = inner.generations.detach(key) else {
            return;
        };
        let mut aborted = 0;
        for nag in bucket.members() {
            let Some(session_id) = self.bindings.session_of(nag.id()) else {
                continue;
            };
            if let Some(session) = inner.sessions.get(&session_id) {
                if session.abort() {
                    aborted += 1;
                }
            }
        }
        inner.idle_nags.retain(|nag| !bucket.contains(nag.id()));
        let dropped = inner.inbox.remove_where(|nag| bucket.contains(nag.id()));
        log::debug!("generation {key} aborted: {aborted} running, {dropped} results dropped");
    }

    /// Cancels everything and deactivates dispatch of new boards.
    pub fn stop_all(&self) {
        let mut inner = self.inner.lock();
        inner.active = false;
        inner.idle_nags.clear();
        for session in inner.sessions.values() {
            session.abort();
        }
        inner.generations.clear();
        inner.inbox.clear();
        log::debug!("all generations stopped");
    }

    /// Pushes a new board size to every session and activates the pool.
    pub fn initialize(&self, board_size: u32) {
        let mut inner = self.inner.lock();
        inner.board_size = Some(board_size);
        inner.generations.clear();
        inner.active = true;

        let sessions: Vec<Arc<WorkerSession>> = inner.sessions.values().cloned().collect();
        for session in sessions {
            match session.initialize(board_size) {
                InitOutcome::Sent | InitOutcome::Deferred | InitOutcome::InFlight => {
                    let id = session.id();
                    inner.idle_sessions.retain(|idle| *idle != id);
                }
                InitOutcome::Ignored => {}
            }
        }
        log::info!("board size {board_size}, {} sessions reset", inner.sessions.len());
    }

    /// Disconnects every session and stops the event pump.
    pub fn shutdown(&self, terminate: bool) {
        let sessions: Vec<Arc<WorkerSession>> = {
            let mut inner = self.inner.lock();
            inner.active = false;
            inner.idle_sessions.clear();
            inner.idle_nags.clear();
            inner.sessions.values().cloned().collect()
        };
        for session in sessions {
            session.disconnect(terminate);
        }
        let _ = self.events.send(Event::Shutdown);
        if let Some(pump) = self.pump.lock().take() {
            if pump.join().is_err() {
                log::error!("event pump panicked");
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.lock();
        PoolStatus {
            sessions: inner.sessions.len(),
            idle_sessions: inner.idle_sessions.len(),
            idle_nags: inner.idle_nags.len(),
            bound: self.bindings.len(),
            inbox: inner.inbox.len(),
            generations: inner.generations.len(),
            active: inner.active,
            board_size: inner.board_size,
        }
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<WorkerSession>> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<WorkerSession>> {
        let mut sessions: Vec<_> = self.inner.lock().sessions.values().cloned().collect();
        sessions.sort_by_key(|session| session.id());
        sessions
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Shutdown);
    }
}
