use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, select, tick, unbounded};
use nagpool::{BatchRequest, Coordinator, PositionSnapshot, Side, Window};
use nagpool_tcp::{NagpoolConfig, Server};

/// Score bound used as the full window for probes
const PROBE_WINDOW: i32 = 32_000;

/// How long open connections get to flush their last lines on exit
const LINGER: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept workers and keep them initialized
    ///
    /// Reads `status`, `quit` and `terminate` from stdin.
    Serve {
        #[command(flatten)]
        common: CommonArgs,

        /// Seconds between pool status lines
        #[arg(long, default_value_t = 30)]
        status_secs: u64,
    },
    /// Serve, submit one batch for the empty board and print the first result
    Probe {
        #[command(flatten)]
        common: CommonArgs,

        /// Remaining search depth of the batch
        #[arg(long)]
        depth: u32,

        /// Workers to wait for before submitting
        #[arg(long, default_value_t = 1)]
        workers: usize,

        /// Upper bound for waiting on workers and on the result
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    listen: Option<String>,

    /// Board size, overrides the config file
    #[arg(long)]
    board_size: Option<u32>,
}

impl CommonArgs {
    fn load(&self) -> Result<NagpoolConfig> {
        let mut config = match &self.config {
            Some(path) => NagpoolConfig::load(path)?,
            None => NagpoolConfig::default(),
        };
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(board_size) = self.board_size {
            config.board_size = board_size;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );
    builder
        .format(|buf, record| {
            writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())
        })
        .write_style(env_logger::WriteStyle::Never)
        .target(env_logger::Target::Stderr)
        .init();

    let result = match cli.command {
        Command::Serve {
            common,
            status_secs,
        } => run_serve(&common, Duration::from_secs(status_secs.max(1))),
        Command::Probe {
            common,
            depth,
            workers,
            wait_secs,
        } => run_probe(&common, depth, workers, Duration::from_secs(wait_secs)),
    };
    if let Err(e) = result {
        log::error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

/// Loads config and patterns, starts the coordinator and the accept loop.
fn start(common: &CommonArgs) -> Result<(NagpoolConfig, Arc<Coordinator>, Server)> {
    let config = common.load()?;
    let patterns = config.load_patterns()?;
    log::info!("{} pattern entries loaded", patterns.len());

    let coordinator = Coordinator::start(config.coordinator.clone(), patterns);
    coordinator.initialize(config.board_size);
    let server = Server::spawn(config.listen_addr()?, Arc::clone(&coordinator))?;
    Ok((config, coordinator, server))
}

/// Disconnects every worker, then lets the connections drain.
fn finish(server: Server, coordinator: &Coordinator, terminate: bool) -> Result<()> {
    server.stop_accepting();
    coordinator.shutdown(terminate);
    server.stop(LINGER)
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
        log::debug!("stdin closed");
    });
    rx
}

fn run_serve(common: &CommonArgs, status_every: Duration) -> Result<()> {
    let (_config, coordinator, server) = start(common)?;
    let commands = spawn_stdin_reader();
    let ticker = tick(status_every);
    let mut stdin_open = true;

    let terminate = 'serve: loop {
        let input = if stdin_open {
            commands.clone()
        } else {
            crossbeam_channel::never()
        };
        select! {
            recv(ticker) -> _ => log::info!("pool: {}", coordinator.status()),
            recv(input) -> msg => match msg {
                Ok(line) => match line.as_str() {
                    "status" => println!("{}", coordinator.status()),
                    "quit" => break 'serve false,
                    "terminate" => break 'serve true,
                    other => log::warn!("unknown command {other:?} (status, quit, terminate)"),
                },
                Err(_) => stdin_open = false,
            },
        }
    };

    finish(server, &coordinator, terminate)
}

fn run_probe(common: &CommonArgs, depth: u32, workers: usize, wait: Duration) -> Result<()> {
    let (config, coordinator, server) = start(common)?;

    let deadline = Instant::now() + wait;
    while coordinator.status().idle_sessions < workers.max(1) {
        if Instant::now() >= deadline {
            finish(server, &coordinator, false)?;
            bail!("timed out waiting for {workers} idle worker(s): {}", coordinator.status());
        }
        thread::sleep(Duration::from_millis(50));
    }

    let snapshot = PositionSnapshot::default();
    let status = coordinator.status();
    let request = BatchRequest {
        snapshot: &snapshot,
        window: Window::new(-PROBE_WINDOW, PROBE_WINDOW),
        narrowed: None,
        side_to_move: Side::Black,
        current_depth: 0,
        max_depth: depth,
        legal_moves: config.vertices().context("board too large")?,
        cap: status.idle_sessions,
    };
    let nags = coordinator.create_batch(&request);
    if nags.is_empty() {
        finish(server, &coordinator, false)?;
        bail!("batch refused (depth {depth}, pool: {status})");
    }
    log::info!("submitted {} task(s)", nags.len());

    let outcome = coordinator.wait_result(0, wait);
    coordinator.abort(0);
    finish(server, &coordinator, false)?;

    let nag = outcome.context("no result before the deadline")?;
    let result = nag.result().context("completed task without a result")?;
    println!(
        "{} seed={} depth={} score={} move={}",
        nag.id(),
        nag.ordering_seed(),
        nag.depth(),
        result.score,
        result.best_move
    );
    Ok(())
}
