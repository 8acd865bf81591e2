//! Worker-side half of the protocol
//!
//! A worker process wraps its search engine in a [`Searcher`] and feeds the
//! coordinator's command stream to [`PeerRuntime::run`]. Commands are looked up
//! in a fixed table; `search` runs on its own thread so that `abort` can still
//! be read and served while it is busy.

mod table;

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use parking_lot::Mutex;

use crate::nag::{Move, NagResult, OrderingSeed, Side, Window};
use crate::protocol::{self, CommandId, PROTOCOL_VERSION, RawCommand, Reply};
use table::{COMMANDS, SearchPolicy};

/// Boundary to the worker's search engine
pub trait Searcher: Send {
    fn set_board_size(&mut self, size: u32) -> anyhow::Result<()>;
    fn clear_board(&mut self);
    fn play(&mut self, mv: Move) -> anyhow::Result<()>;
    fn set_depth(&mut self, depth: u32);
    fn set_window(&mut self, window: Window);
    fn set_permutation(&mut self, seed: OrderingSeed);
    fn clear_patterns(&mut self);
    fn add_patterns(&mut self, patterns: Vec<String>);

    /// Searches the current position. Should return soon after `abort` is raised;
    /// `None` is reported as a failed search, which makes the coordinator drop
    /// this connection.
    fn search(&mut self, side: Side, abort: &AtomicBool) -> Option<NagResult>;
}

/// Why [`PeerRuntime::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerExit {
    /// Coordinator sent `disconnect`
    Disconnected,
    /// Coordinator sent `terminate`; the process should exit
    Terminated,
    /// We announced our departure through [`PeerHandle::hang_up`]
    HungUp,
    ConnectionLost,
}

pub(crate) enum Outcome {
    Reply(String),
    /// Answered later on another thread
    Pending,
    Exit(PeerExit),
}

impl Outcome {
    fn done() -> Self {
        Outcome::Reply(String::new())
    }
}

/// Serialized reply output shared with the search thread
#[derive(Clone)]
pub struct ReplyWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ReplyWriter {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn send(&self, reply: &Reply) -> io::Result<()> {
        let mut writer = self.inner.lock();
        writeln!(writer, "{}", reply.encode())?;
        writer.flush()
    }
}

/// Lets another thread end the session from the worker's side.
#[derive(Clone)]
pub struct PeerHandle {
    writer: ReplyWriter,
    hung_up: Arc<AtomicBool>,
}

impl PeerHandle {
    /// Sends the `0.0` failure line. The coordinator drops the session and
    /// closes the connection, which ends [`PeerRuntime::run`].
    pub fn hang_up(&self) -> io::Result<()> {
        self.hung_up.store(true, Ordering::Release);
        self.writer.send(&Reply::failure(CommandId::HANG_UP, "bye"))
    }
}

pub struct PeerRuntime {
    searcher: Arc<Mutex<Box<dyn Searcher>>>,
    writer: ReplyWriter,
    abort: Arc<AtomicBool>,
    search: Option<JoinHandle<()>>,
    hung_up: Arc<AtomicBool>,
    protocol_version: String,
}

impl PeerRuntime {
    pub fn new<S, W>(searcher: S, writer: W) -> Self
    where
        S: Searcher + 'static,
        W: Write + Send + 'static,
    {
        Self {
            searcher: Arc::new(Mutex::new(Box::new(searcher))),
            writer: ReplyWriter::new(writer),
            abort: Arc::new(AtomicBool::new(false)),
            search: None,
            hung_up: Arc::new(AtomicBool::new(false)),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Version reported during negotiation
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn handle(&self) -> PeerHandle {
        PeerHandle {
            writer: self.writer.clone(),
            hung_up: Arc::clone(&self.hung_up),
        }
    }

    /// Serves commands until the coordinator ends the session or the stream ends.
    pub fn run<R: BufRead>(mut self, reader: R) -> anyhow::Result<PeerExit> {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("peer: read failed: {e}");
                    break;
                }
            };
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if let Some(exit) = self.execute(line)? {
                log::info!("peer: session ended ({exit:?})");
                return Ok(exit);
            }
        }
        self.stop_search(true);
        if self.hung_up.load(Ordering::Acquire) {
            Ok(PeerExit::HungUp)
        } else {
            Ok(PeerExit::ConnectionLost)
        }
    }

    fn execute(&mut self, line: &str) -> anyhow::Result<Option<PeerExit>> {
        log::trace!("peer << {line}");
        let command = match RawCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                // nothing to correlate a failure reply with
                log::warn!("peer: {e}");
                return Ok(None);
            }
        };
        let id = command.id;
        let Some(spec) = COMMANDS.get(command.name) else {
            self.reply(Reply::failure(id, format!("unknown command {}", command.name)))?;
            return Ok(None);
        };
        if !spec.arity.accepts(command.args.len()) {
            let payload = format!("{}: wrong number of arguments", command.name);
            self.reply(Reply::failure(id, payload))?;
            return Ok(None);
        }

        match spec.search {
            SearchPolicy::Ignore => {}
            SearchPolicy::Wait => self.stop_search(false),
            SearchPolicy::Abort => self.stop_search(true),
        }

        match (spec.handler)(self, id, &command.args) {
            Ok(Outcome::Reply(payload)) => {
                self.reply(Reply::success(id, payload))?;
                Ok(None)
            }
            Ok(Outcome::Pending) => Ok(None),
            Ok(Outcome::Exit(exit)) => {
                // the coordinator may already be gone
                if let Err(e) = self.writer.send(&Reply::success(id, "")) {
                    log::debug!("peer: exit acknowledgment not delivered: {e}");
                }
                Ok(Some(exit))
            }
            Err(e) => {
                log::debug!("peer: {} {id} failed: {e:#}", command.name);
                self.reply(Reply::failure(id, format!("{e:#}")))?;
                Ok(None)
            }
        }
    }

    fn reply(&self, reply: Reply) -> anyhow::Result<()> {
        log::trace!("peer >> {}", reply.encode());
        self.writer.send(&reply).context("writing reply")
    }

    pub(crate) fn spawn_search(&mut self, id: CommandId, side: Side) {
        self.abort.store(false, Ordering::Release);
        let searcher = Arc::clone(&self.searcher);
        let writer = self.writer.clone();
        let abort = Arc::clone(&self.abort);
        self.search = Some(thread::spawn(move || {
            let result = searcher.lock().search(side, &abort);
            if abort.load(Ordering::Acquire) {
                log::debug!("peer: search {id} aborted");
                return;
            }
            let reply = match result {
                Some(result) => Reply::success(id, protocol::format_search_payload(&result)),
                None => Reply::failure(id, "no result"),
            };
            if let Err(e) = writer.send(&reply.into_async()) {
                log::warn!("peer: search result {id} not delivered: {e}");
            }
        }));
    }

    /// Joins the search thread, raising the abort flag first if `abort`.
    fn stop_search(&mut self, abort: bool) {
        let Some(handle) = self.search.take() else {
            return;
        };
        if abort {
            self.abort.store(true, Ordering::Release);
        }
        if handle.join().is_err() {
            log::error!("peer: search thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nag::Point;
    use std::io::Cursor;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock()).lines().map(str::to_string).collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorded {
        board_size: Option<u32>,
        moves: Vec<Move>,
        depth: u32,
        window: Option<Window>,
        seed: Option<OrderingSeed>,
        patterns: Vec<String>,
    }

    /// Answers instantly with a fixed result, or spins until aborted.
    struct FakeSearcher {
        recorded: Arc<Mutex<Recorded>>,
        result: Option<NagResult>,
        block: bool,
    }

    impl Searcher for FakeSearcher {
        fn set_board_size(&mut self, size: u32) -> anyhow::Result<()> {
            if size > 25 {
                anyhow::bail!("unsupported board size {size}");
            }
            self.recorded.lock().board_size = Some(size);
            Ok(())
        }

        fn clear_board(&mut self) {
            self.recorded.lock().moves.clear();
        }

        fn play(&mut self, mv: Move) -> anyhow::Result<()> {
            self.recorded.lock().moves.push(mv);
            Ok(())
        }

        fn set_depth(&mut self, depth: u32) {
            self.recorded.lock().depth = depth;
        }

        fn set_window(&mut self, window: Window) {
            self.recorded.lock().window = Some(window);
        }

        fn set_permutation(&mut self, seed: OrderingSeed) {
            self.recorded.lock().seed = Some(seed);
        }

        fn clear_patterns(&mut self) {
            self.recorded.lock().patterns.clear();
        }

        fn add_patterns(&mut self, patterns: Vec<String>) {
            self.recorded.lock().patterns.extend(patterns);
        }

        fn search(&mut self, _side: Side, abort: &AtomicBool) -> Option<NagResult> {
            while self.block && !abort.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            self.result
        }
    }

    fn runtime(block: bool) -> (PeerRuntime, SharedBuf, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let searcher = FakeSearcher {
            recorded: Arc::clone(&recorded),
            result: Some(NagResult {
                score: 7,
                best_move: Point::new(31),
            }),
            block,
        };
        let out = SharedBuf::default();
        (PeerRuntime::new(searcher, out.clone()), out, recorded)
    }

    fn script(lines: &[&str]) -> Cursor<Vec<u8>> {
        Cursor::new(lines.join("\n").into_bytes())
    }

    #[test]
    fn test_setup_commands_reach_searcher() {
        let (peer, out, recorded) = runtime(false);
        let exit = peer
            .run(script(&[
                "1.1\tversion",
                "2.1\tclear_patterns",
                "2.2\tadd_patterns\tA\u{1}..X\tB",
                "3.1\tset_boardsize\t9",
                "4.1\tclearboard",
                "4.2\tplay_sequence\tb\t40\tw\tpass",
                "4.3\tset_depth\t6",
                "4.4\tset_alpha_beta\t-20\t20",
                "4.5\tset_permutation\t3",
                "5.1\tdisconnect",
            ]))
            .unwrap();

        assert_eq!(exit, PeerExit::Disconnected);
        assert_eq!(
            out.lines(),
            vec![
                "=\t1.1\t1", "=\t2.1\t", "=\t2.2\t", "=\t3.1\t", "=\t4.1\t", "=\t4.2\t",
                "=\t4.3\t", "=\t4.4\t", "=\t4.5\t", "=\t5.1\t",
            ]
        );
        let recorded = recorded.lock();
        assert_eq!(recorded.board_size, Some(9));
        assert_eq!(recorded.moves.len(), 2);
        assert!(recorded.moves[1].point.is_pass());
        assert_eq!(recorded.depth, 6);
        assert_eq!(recorded.window, Some(Window::new(-20, 20)));
        assert_eq!(recorded.seed.map(OrderingSeed::get), Some(3));
        assert_eq!(recorded.patterns, vec!["A\n..X".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_search_reports_asynchronously() {
        let (peer, out, _) = runtime(false);
        let exit = peer
            .run(script(&["4.6\tsearch\tw", "5.1\tclearboard", "6.1\tterminate"]))
            .unwrap();
        assert_eq!(exit, PeerExit::Terminated);
        assert_eq!(out.lines(), vec!["!=\t4.6\t7 31", "=\t5.1\t", "=\t6.1\t"]);
    }

    #[test]
    fn test_abort_stops_search_without_result() {
        let (peer, out, _) = runtime(true);
        let exit = peer.run(script(&["4.6\tsearch\tb", "5.1\tabort"])).unwrap();
        assert_eq!(exit, PeerExit::ConnectionLost);
        assert_eq!(out.lines(), vec!["=\t5.1\t"]);
    }

    #[test]
    fn test_rejections_become_failure_replies() {
        let (peer, out, _) = runtime(false);
        peer.run(script(&[
            "1.1\tfly",
            "1.2\tset_depth",
            "1.3\tset_permutation\t10",
            "1.4\tset_boardsize\t99",
            "1.5\tplay_sequence\tb",
            "1.6\tset_alpha_beta\t5\t5",
            "garbage",
        ]))
        .unwrap();

        let lines = out.lines();
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().all(|line| line.starts_with("?\t1.")));
        assert!(lines[3].contains("unsupported board size 99"));
    }

    #[test]
    fn test_hang_up_announces_departure() {
        let (peer, out, _) = runtime(false);
        let handle = peer.handle();
        handle.hang_up().unwrap();
        assert_eq!(peer.run(script(&[])).unwrap(), PeerExit::HungUp);
        assert_eq!(out.lines(), vec!["?\t0.0\tbye"]);
        assert!(Reply::parse(&out.lines()[0]).unwrap().is_hang_up());
    }

    #[test]
    fn test_custom_protocol_version() {
        let (peer, out, _) = runtime(false);
        peer.with_protocol_version("2").run(script(&["1.1\tversion"])).unwrap();
        assert_eq!(out.lines(), vec!["=\t1.1\t2"]);
    }
}
