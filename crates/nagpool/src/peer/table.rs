//! Worker command table, built once on first use

use std::collections::HashMap;

use anyhow::{Context, bail};
use once_cell::sync::Lazy;

use super::{Outcome, PeerExit, PeerRuntime};
use crate::nag::{OrderingSeed, Side, Window};
use crate::protocol::{self, CommandId, CommandName, patterns};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Side/point pairs
    Even,
}

impl Arity {
    pub(crate) fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Even => count % 2 == 0,
        }
    }
}

/// What a command does to a search still running on the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchPolicy {
    Ignore,
    /// Let it finish first
    Wait,
    Abort,
}

pub(crate) type Handler = fn(&mut PeerRuntime, CommandId, &[&str]) -> anyhow::Result<Outcome>;

pub(crate) struct CommandSpec {
    pub arity: Arity,
    pub search: SearchPolicy,
    pub handler: Handler,
}

pub(crate) static COMMANDS: Lazy<HashMap<&'static str, CommandSpec>> = Lazy::new(|| {
    use Arity::*;
    use SearchPolicy::*;

    let entries: [(CommandName, Arity, SearchPolicy, Handler); 13] = [
        (CommandName::Version, Exact(0), Ignore, version),
        (CommandName::SetBoardsize, Exact(1), Abort, set_boardsize),
        (CommandName::ClearBoard, Exact(0), Wait, clearboard),
        (CommandName::PlaySequence, Even, Wait, play_sequence),
        (CommandName::SetDepth, Exact(1), Wait, set_depth),
        (CommandName::SetAlphaBeta, Exact(2), Wait, set_alpha_beta),
        (CommandName::SetPermutation, Exact(1), Wait, set_permutation),
        (CommandName::AddPatterns, AtLeast(0), Wait, add_patterns),
        (CommandName::ClearPatterns, Exact(0), Wait, clear_patterns),
        (CommandName::Search, Exact(1), Abort, search),
        (CommandName::Abort, Exact(0), Abort, abort),
        (CommandName::Disconnect, Exact(0), Abort, disconnect),
        (CommandName::Terminate, Exact(0), Abort, terminate),
    ];
    entries
        .into_iter()
        .map(|(name, arity, search, handler)| {
            (name.as_str(), CommandSpec { arity, search, handler })
        })
        .collect()
});

fn parse_arg<T: std::str::FromStr>(arg: &str, what: &str) -> anyhow::Result<T> {
    arg.parse::<T>().ok().with_context(|| format!("invalid {what}: {arg:?}"))
}

fn version(peer: &mut PeerRuntime, _: CommandId, _: &[&str]) -> anyhow::Result<Outcome> {
    Ok(Outcome::Reply(peer.protocol_version.clone()))
}

fn set_boardsize(peer: &mut PeerRuntime, _: CommandId, args: &[&str]) -> anyhow::Result<Outcome> {
    let size: u32 = parse_arg(args[0], "board size")?;
    if size == 0 {
        bail!("board size must be positive");
    }
    peer.searcher.lock().set_board_size(size)?;
    Ok(Outcome::done())
}

fn clearboard(peer: &mut PeerRuntime, _: CommandId, _: &[&str]) -> anyhow::Result<Outcome> {
    peer.searcher.lock().clear_board();
    Ok(Outcome::done())
}

fn play_sequence(peer: &mut PeerRuntime, _: CommandId, args: &[&str]) -> anyhow::Result<Outcome> {
    let history = protocol::parse_history(args)?;
    let mut searcher = peer.searcher.lock();
    for mv in history {
        searcher.play(mv).with_context(|| format!("illegal move {} {}", mv.side, mv.point))?;
    }
    Ok(Outcome::done())
}

fn set_depth(peer: &mut PeerRuntime, _: CommandId, args: &[&str]) -> anyhow::Result<Outcome> {
    let depth: u32 = parse_arg(args[0], "depth")?;
    peer.searcher.lock().set_depth(depth);
    Ok(Outcome::done())
}

fn set_alpha_beta(peer: &mut PeerRuntime, _: CommandId, args: &[&str]) -> anyhow::Result<Outcome> {
    let alpha: i32 = parse_arg(args[0], "alpha")?;
    let beta: i32 = parse_arg(args[1], "beta")?;
    if alpha >= beta {
        bail!("empty window [{alpha}, {beta}]");
    }
    peer.searcher.lock().set_window(Window::new(alpha, beta));
    Ok(Outcome::done())
}

fn set_permutation(peer: &mut PeerRuntime, _: CommandId, args: &[&str]) -> anyhow::Result<Outcome> {
    let seed = args[0]
        .parse::<u8>()
        .ok()
        .and_then(OrderingSeed::new)
        .ok_or_else(|| crate::error::ProtocolError::InvalidSeed(args[0].to_string()))?;
    peer.searcher.lock().set_permutation(seed);
    Ok(Outcome::done())
}

fn add_patterns(peer: &mut PeerRuntime, _: CommandId, args: &[&str]) -> anyhow::Result<Outcome> {
    let entries = patterns::decode(&args.join("\t"));
    log::debug!("peer: loading {} patterns", entries.len());
    peer.searcher.lock().add_patterns(entries);
    Ok(Outcome::done())
}

fn clear_patterns(peer: &mut PeerRuntime, _: CommandId, _: &[&str]) -> anyhow::Result<Outcome> {
    peer.searcher.lock().clear_patterns();
    Ok(Outcome::done())
}

fn search(peer: &mut PeerRuntime, id: CommandId, args: &[&str]) -> anyhow::Result<Outcome> {
    let side: Side = args[0].parse()?;
    peer.spawn_search(id, side);
    Ok(Outcome::Pending)
}

fn abort(_: &mut PeerRuntime, _: CommandId, _: &[&str]) -> anyhow::Result<Outcome> {
    // the running search was already stopped by the table's policy
    Ok(Outcome::done())
}

fn disconnect(_: &mut PeerRuntime, _: CommandId, _: &[&str]) -> anyhow::Result<Outcome> {
    Ok(Outcome::Exit(PeerExit::Disconnected))
}

fn terminate(_: &mut PeerRuntime, _: CommandId, _: &[&str]) -> anyhow::Result<Outcome> {
    Ok(Outcome::Exit(PeerExit::Terminated))
}
