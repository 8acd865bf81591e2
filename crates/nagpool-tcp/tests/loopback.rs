//! Coordinator and workers talking over real loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nagpool::{
    BatchRequest, Coordinator, CoordinatorConfig, Move, NagResult, OrderingSeed, PatternSet,
    PeerExit, PeerHandle, Point, PositionSnapshot, Searcher, Side, Window,
};
use nagpool_tcp::{Server, connect_peer};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Reports its ordering seed as the score, or spins until aborted when `block` is set.
struct SeedEcho {
    seed: u8,
    moves: usize,
    block: bool,
}

impl SeedEcho {
    fn new(block: bool) -> Self {
        Self {
            seed: 0,
            moves: 0,
            block,
        }
    }
}

impl Searcher for SeedEcho {
    fn set_board_size(&mut self, _size: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn clear_board(&mut self) {
        self.moves = 0;
    }

    fn play(&mut self, _mv: Move) -> anyhow::Result<()> {
        self.moves += 1;
        Ok(())
    }

    fn set_depth(&mut self, _depth: u32) {}

    fn set_window(&mut self, _window: Window) {}

    fn set_permutation(&mut self, seed: OrderingSeed) {
        self.seed = seed.get();
    }

    fn clear_patterns(&mut self) {}

    fn add_patterns(&mut self, _patterns: Vec<String>) {}

    fn search(&mut self, _side: Side, abort: &AtomicBool) -> Option<NagResult> {
        while self.block && !abort.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(2));
        }
        Some(NagResult {
            score: i32::from(self.seed),
            best_move: Point::new(self.moves as u16),
        })
    }
}

struct Pool {
    coordinator: Arc<Coordinator>,
    server: Server,
}

impl Pool {
    fn start(board_size: u32) -> Self {
        let patterns = PatternSet::new(vec!["shape A\n..X".to_string()]);
        let coordinator = Coordinator::start(CoordinatorConfig::with_seed(3), patterns);
        coordinator.initialize(board_size);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = Server::spawn(addr, Arc::clone(&coordinator)).unwrap();
        Self {
            coordinator,
            server,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    fn wait_for(&self, what: &str, cond: impl Fn(&Coordinator) -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !cond(&self.coordinator) {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {what}: {}",
                self.coordinator.status()
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn stop(self, terminate: bool) {
        self.server.stop_accepting();
        self.coordinator.shutdown(terminate);
        self.server.stop(TIMEOUT).unwrap();
    }
}

fn spawn_worker(addr: SocketAddr, block: bool) -> (PeerHandle, JoinHandle<PeerExit>) {
    let connection = connect_peer(addr, SeedEcho::new(block)).unwrap();
    let handle = connection.handle();
    let join = thread::spawn(move || connection.run().unwrap());
    (handle, join)
}

fn request(snapshot: &PositionSnapshot, current_depth: u32, cap: usize) -> BatchRequest<'_> {
    BatchRequest {
        snapshot,
        window: Window::new(-1000, 1000),
        narrowed: Some(Window::new(-10, 10)),
        side_to_move: Side::Black,
        current_depth,
        max_depth: current_depth + 4,
        legal_moves: 20,
        cap,
    }
}

#[test]
fn batch_results_come_back_over_tcp() {
    let pool = Pool::start(9);
    let workers: Vec<_> = (0..2).map(|_| spawn_worker(pool.addr(), false)).collect();
    pool.wait_for("two idle workers", |c| c.status().idle_sessions == 2);

    let snapshot = PositionSnapshot::new(
        vec![
            Move::new(Side::Black, Point::new(40)),
            Move::new(Side::White, Point::new(41)),
        ],
        77,
    );
    let nags = pool.coordinator.create_batch(&request(&snapshot, 2, 4));
    assert_eq!(nags.len(), 2);

    let mut results = Vec::new();
    while results.len() < 2 {
        let nag = pool
            .coordinator
            .wait_result(2, TIMEOUT)
            .expect("result before timeout");
        results.push(nag);
    }
    for nag in &results {
        let result = nag.result().unwrap();
        assert_eq!(result.score, i32::from(nag.ordering_seed().get()));
        assert_eq!(result.best_move, Point::new(2), "history replayed before search");
        assert!(nags.iter().any(|n| n.id() == nag.id()));
    }
    pool.wait_for("workers back in the idle queue", |c| c.status().idle_sessions == 2);

    pool.stop(true);
    for (_, join) in workers {
        assert_eq!(join.join().unwrap(), PeerExit::Terminated);
    }
}

#[test]
fn abort_invalidates_running_batch() {
    let pool = Pool::start(9);
    let workers: Vec<_> = (0..2).map(|_| spawn_worker(pool.addr(), true)).collect();
    pool.wait_for("two idle workers", |c| c.status().idle_sessions == 2);

    let snapshot = PositionSnapshot::default();
    let nags = pool.coordinator.create_batch(&request(&snapshot, 5, 2));
    assert_eq!(nags.len(), 2);
    assert_eq!(pool.coordinator.status().bound, 2);

    pool.coordinator.abort(5);
    assert_eq!(pool.coordinator.status().bound, 0);
    pool.wait_for("aborted workers ready again", |c| c.status().idle_sessions == 2);

    assert!(pool.coordinator.poll_result(5).is_none());
    assert!(nags.iter().all(|nag| nag.result().is_none()));

    pool.stop(false);
    for (_, join) in workers {
        assert_eq!(join.join().unwrap(), PeerExit::Disconnected);
    }
}

#[test]
fn hang_up_and_version_mismatch_drop_the_session() {
    let pool = Pool::start(13);
    let (handle, join) = spawn_worker(pool.addr(), false);
    pool.wait_for("one idle worker", |c| c.status().idle_sessions == 1);

    handle.hang_up().unwrap();
    pool.wait_for("session removed", |c| c.status().sessions == 0);
    assert_eq!(join.join().unwrap(), PeerExit::HungUp);

    let stranger = connect_peer(pool.addr(), SeedEcho::new(false))
        .unwrap()
        .with_protocol_version("0");
    let exit = thread::spawn(move || stranger.run().unwrap());
    assert_eq!(exit.join().unwrap(), PeerExit::ConnectionLost);
    pool.wait_for("mismatched session removed", |c| c.status().sessions == 0);

    pool.stop(false);
}

#[test]
fn stop_accepting_keeps_open_sessions() {
    let pool = Pool::start(9);
    let (_, join) = spawn_worker(pool.addr(), false);
    pool.wait_for("one idle worker", |c| c.status().idle_sessions == 1);

    pool.server.stop_accepting();
    let deadline = Instant::now() + TIMEOUT;
    while connect_peer(pool.addr(), SeedEcho::new(false)).is_ok() {
        assert!(Instant::now() < deadline, "listener still open");
        thread::sleep(Duration::from_millis(5));
    }
    pool.wait_for("the first session only", |c| {
        let status = c.status();
        status.sessions == 1 && status.idle_sessions == 1
    });

    pool.stop(true);
    assert_eq!(join.join().unwrap(), PeerExit::Terminated);
}
