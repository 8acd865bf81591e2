//! Task descriptors ("nags") and the value types they are built from
//!
//! A [`Nag`] is one speculative subtree search handed to exactly one remote
//! worker. Siblings created by the same batch share the position, window and
//! depth and differ only in their [`OrderingSeed`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::OnceCell;
use rand::Rng;

use crate::error::ProtocolError;

static NEXT_NAG_ID: AtomicU64 = AtomicU64::new(1);

/// Side to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Black,
    White,
}

impl Side {
    pub fn as_wire(self) -> &'static str {
        match self {
            Side::Black => "b",
            Side::White => "w",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for Side {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "b" | "B" => Ok(Side::Black),
            "w" | "W" => Ok(Side::White),
            _ => Err(ProtocolError::InvalidSide(s.to_string())),
        }
    }
}

/// Board vertex, encoded as a plain index so the core stays board-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point(u16);

impl Point {
    pub const PASS: Point = Point(u16::MAX);

    pub const fn new(index: u16) -> Self {
        Point(index)
    }

    /// Vertex index, `None` for a pass
    pub fn index(self) -> Option<u16> {
        if self.is_pass() { None } else { Some(self.0) }
    }

    pub fn is_pass(self) -> bool {
        self == Self::PASS
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(index) => write!(f, "{index}"),
            None => f.write_str("pass"),
        }
    }
}

impl FromStr for Point {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("pass") {
            return Ok(Point::PASS);
        }
        match s.parse::<u16>() {
            Ok(index) if index != u16::MAX => Ok(Point(index)),
            _ => Err(ProtocolError::InvalidPoint(s.to_string())),
        }
    }
}

/// One entry of a move history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub side: Side,
    pub point: Point,
}

impl Move {
    pub const fn new(side: Side, point: Point) -> Self {
        Self { side, point }
    }
}

/// Alpha-beta search window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub alpha: i32,
    pub beta: i32,
}

impl Window {
    pub const fn new(alpha: i32, beta: i32) -> Self {
        Self { alpha, beta }
    }
}

/// Move-ordering permutation selector in `1..=9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderingSeed(u8);

impl OrderingSeed {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 9;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Uniform draw over the whole range. Siblings draw independently, so a
    /// batch may carry the same seed twice.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.random_range(Self::MIN..=Self::MAX))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for OrderingSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NagId(u64);

impl NagId {
    fn next() -> Self {
        NagId(NEXT_NAG_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nag#{}", self.0)
    }
}

/// Board state handed over by the search logic when it asks for a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionSnapshot {
    /// Moves replayed from the empty board to reach the position
    pub history: Vec<Move>,
    /// Position fingerprint (zobrist or equivalent) of the originating board
    pub hash: u64,
}

impl PositionSnapshot {
    pub fn new(history: Vec<Move>, hash: u64) -> Self {
        Self { history, hash }
    }
}

/// Outcome of a remote search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NagResult {
    pub score: i32,
    pub best_move: Point,
}

/// Fields shared by every sibling of one batch
#[derive(Debug, Clone)]
pub(crate) struct NagTemplate {
    pub window: Window,
    pub narrowed: Window,
    pub depth: u32,
    pub start_depth: u32,
    pub side_to_move: Side,
    pub history: Arc<[Move]>,
    pub position_hash: u64,
}

/// One speculative search assignment.
///
/// Everything but the result slot is fixed at creation. The result is a
/// write-once cell filled by the session that completes the search.
#[derive(Debug)]
pub struct Nag {
    id: NagId,
    window: Window,
    narrowed: Window,
    depth: u32,
    start_depth: u32,
    side_to_move: Side,
    history: Arc<[Move]>,
    position_hash: u64,
    ordering_seed: OrderingSeed,
    result: OnceCell<NagResult>,
}

impl Nag {
    pub(crate) fn from_template(template: &NagTemplate, ordering_seed: OrderingSeed) -> Self {
        Self {
            id: NagId::next(),
            window: template.window,
            narrowed: template.narrowed,
            depth: template.depth,
            start_depth: template.start_depth,
            side_to_move: template.side_to_move,
            history: Arc::clone(&template.history),
            position_hash: template.position_hash,
            ordering_seed,
            result: OnceCell::new(),
        }
    }

    pub fn id(&self) -> NagId {
        self.id
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// Window the worker is told to search with
    pub fn narrowed_window(&self) -> Window {
        self.narrowed
    }

    pub fn is_narrowed(&self) -> bool {
        self.window != self.narrowed
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Generation key of the batch this nag belongs to
    pub fn start_depth(&self) -> u32 {
        self.start_depth
    }

    pub fn side_to_move(&self) -> Side {
        self.side_to_move
    }

    pub fn history(&self) -> &[Move] {
        &self.history
    }

    pub fn position_hash(&self) -> u64 {
        self.position_hash
    }

    pub fn ordering_seed(&self) -> OrderingSeed {
        self.ordering_seed
    }

    pub fn result(&self) -> Option<NagResult> {
        self.result.get().copied()
    }

    /// Returns `false` if a result was already recorded.
    pub(crate) fn set_result(&self, result: NagResult) -> bool {
        let stored = self.result.set(result).is_ok();
        if !stored {
            log::warn!("{}: result already recorded, dropping {:?}", self.id, result);
        }
        stored
    }
}

#[cfg(test)]
pub(crate) fn test_template(start_depth: u32) -> NagTemplate {
    NagTemplate {
        window: Window::new(-100, 100),
        narrowed: Window::new(-100, 100),
        depth: 5,
        start_depth,
        side_to_move: Side::Black,
        history: Arc::from(vec![Move::new(Side::Black, Point::new(40))]),
        position_hash: 0xdead_beef,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_ordering_seed_bounds() {
        assert!(OrderingSeed::new(0).is_none());
        assert!(OrderingSeed::new(10).is_none());
        assert_eq!(OrderingSeed::new(1).map(OrderingSeed::get), Some(1));
        assert_eq!(OrderingSeed::new(9).map(OrderingSeed::get), Some(9));

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        for _ in 0..1000 {
            let seed = OrderingSeed::random(&mut rng).get();
            assert!((1..=9).contains(&seed), "seed out of range: {seed}");
        }
    }

    #[test]
    fn test_point_wire_format() {
        assert_eq!(Point::new(42).to_string(), "42");
        assert_eq!(Point::PASS.to_string(), "pass");
        assert_eq!("pass".parse::<Point>(), Ok(Point::PASS));
        assert_eq!("17".parse::<Point>(), Ok(Point::new(17)));
        assert!("-3".parse::<Point>().is_err());
        assert!("65535".parse::<Point>().is_err());
    }

    #[test]
    fn test_result_is_write_once() {
        let nag = Nag::from_template(&test_template(2), OrderingSeed::new(3).unwrap());
        assert_eq!(nag.result(), None);
        let first = NagResult { score: 12, best_move: Point::new(5) };
        assert!(nag.set_result(first));
        assert!(!nag.set_result(NagResult { score: -1, best_move: Point::PASS }));
        assert_eq!(nag.result(), Some(first));
    }

    #[test]
    fn test_siblings_share_position_but_not_identity() {
        let template = test_template(4);
        let a = Nag::from_template(&template, OrderingSeed::new(1).unwrap());
        let b = Nag::from_template(&template, OrderingSeed::new(1).unwrap());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.history(), b.history());
        assert_eq!(a.start_depth(), 4);
        assert!(!a.is_narrowed());
    }
}
