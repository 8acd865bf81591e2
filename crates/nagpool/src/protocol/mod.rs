//! Line-oriented coordinator ↔ worker wire protocol
//!
//! Commands: `id<TAB>name[<TAB>arg...]`
//! Replies:  `[!]('='|'?')<TAB>id<TAB>payload`
//!
//! `id` is `commandNumber.sequenceNumber`. A leading `!` marks an asynchronous
//! reply, `=` is success and `?` failure. A failure reply with id `0.0` is the
//! peer hanging up.

pub mod patterns;

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::nag::{Move, NagResult, Point, Side};

pub use patterns::PatternSet;

/// Version string exchanged during negotiation
pub const PROTOCOL_VERSION: &str = "1";

pub const FIELD_SEPARATOR: char = '\t';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId {
    pub command: u32,
    pub sequence: u32,
}

impl CommandId {
    /// `0.0`, only ever seen on a peer's hang-up line
    pub const HANG_UP: CommandId = CommandId {
        command: 0,
        sequence: 0,
    };

    pub const fn new(command: u32, sequence: u32) -> Self {
        Self { command, sequence }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.command, self.sequence)
    }
}

impl FromStr for CommandId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ProtocolError::MalformedId(s.to_string());
        let (command, sequence) = s.split_once('.').ok_or_else(malformed)?;
        let command = command.parse::<u32>().map_err(|_| malformed())?;
        let sequence = sequence.parse::<u32>().map_err(|_| malformed())?;
        Ok(CommandId::new(command, sequence))
    }
}

/// Commands the coordinator sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Version,
    SetBoardsize,
    ClearBoard,
    PlaySequence,
    SetDepth,
    SetAlphaBeta,
    SetPermutation,
    AddPatterns,
    ClearPatterns,
    Search,
    Abort,
    Disconnect,
    Terminate,
}

impl CommandName {
    pub const ALL: [CommandName; 13] = [
        CommandName::Version,
        CommandName::SetBoardsize,
        CommandName::ClearBoard,
        CommandName::PlaySequence,
        CommandName::SetDepth,
        CommandName::SetAlphaBeta,
        CommandName::SetPermutation,
        CommandName::AddPatterns,
        CommandName::ClearPatterns,
        CommandName::Search,
        CommandName::Abort,
        CommandName::Disconnect,
        CommandName::Terminate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Version => "version",
            CommandName::SetBoardsize => "set_boardsize",
            CommandName::ClearBoard => "clearboard",
            CommandName::PlaySequence => "play_sequence",
            CommandName::SetDepth => "set_depth",
            CommandName::SetAlphaBeta => "set_alpha_beta",
            CommandName::SetPermutation => "set_permutation",
            CommandName::AddPatterns => "add_patterns",
            CommandName::ClearPatterns => "clear_patterns",
            CommandName::Search => "search",
            CommandName::Abort => "abort",
            CommandName::Disconnect => "disconnect",
            CommandName::Terminate => "terminate",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: CommandId,
    pub name: CommandName,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(id: CommandId, name: CommandName, args: Vec<String>) -> Self {
        Self { id, name, args }
    }

    pub fn encode(&self) -> String {
        let mut line = format!("{}{FIELD_SEPARATOR}{}", self.id, self.name);
        for arg in &self.args {
            line.push(FIELD_SEPARATOR);
            line.push_str(arg);
        }
        line
    }
}

/// Inbound command as seen by a worker, borrowed from the line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand<'a> {
    pub id: CommandId,
    pub name: &'a str,
    pub args: Vec<&'a str>,
}

impl<'a> RawCommand<'a> {
    pub fn parse(line: &'a str) -> Result<Self, ProtocolError> {
        let mut fields = line.split(FIELD_SEPARATOR);
        let id = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProtocolError::MalformedCommand(line.to_string()))?
            .parse::<CommandId>()?;
        let name = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProtocolError::MalformedCommand(line.to_string()))?;
        Ok(Self {
            id,
            name,
            args: fields.collect(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

/// Reply line from a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub asynchronous: bool,
    pub status: Status,
    pub id: CommandId,
    pub payload: String,
}

impl Reply {
    pub fn success(id: CommandId, payload: impl Into<String>) -> Self {
        Self {
            asynchronous: false,
            status: Status::Success,
            id,
            payload: payload.into(),
        }
    }

    pub fn failure(id: CommandId, payload: impl Into<String>) -> Self {
        Self {
            asynchronous: false,
            status: Status::Failure,
            id,
            payload: payload.into(),
        }
    }

    pub fn into_async(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn is_hang_up(&self) -> bool {
        self.id == CommandId::HANG_UP && self.status == Status::Failure
    }

    pub fn encode(&self) -> String {
        let marker = if self.asynchronous { "!" } else { "" };
        let status = match self.status {
            Status::Success => '=',
            Status::Failure => '?',
        };
        format!("{marker}{status}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}", self.id, self.payload)
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut fields = line.splitn(3, FIELD_SEPARATOR);
        let marker = fields.next().unwrap_or_default();
        let (asynchronous, status) = match marker.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, marker),
        };
        let status = match status {
            "=" => Status::Success,
            "?" => Status::Failure,
            _ => return Err(ProtocolError::MalformedReply(line.to_string())),
        };
        let id = fields
            .next()
            .ok_or_else(|| ProtocolError::MalformedReply(line.to_string()))?
            .parse::<CommandId>()?;
        Ok(Self {
            asynchronous,
            status,
            id,
            payload: fields.next().unwrap_or_default().to_string(),
        })
    }
}

/// `play_sequence` arguments: alternating side and point
pub fn history_args(history: &[Move]) -> Vec<String> {
    history
        .iter()
        .flat_map(|mv| [mv.side.to_string(), mv.point.to_string()])
        .collect()
}

pub fn parse_history(args: &[&str]) -> Result<Vec<Move>, ProtocolError> {
    if args.len() % 2 != 0 {
        return Err(ProtocolError::Arity {
            name: CommandName::PlaySequence.to_string(),
            actual: args.len(),
        });
    }
    args.chunks_exact(2)
        .map(|pair| Ok(Move::new(pair[0].parse::<Side>()?, pair[1].parse::<Point>()?)))
        .collect()
}

/// Success payload of `search`: `<score> <point>`
pub fn format_search_payload(result: &NagResult) -> String {
    format!("{} {}", result.score, result.best_move)
}

pub fn parse_search_payload(payload: &str) -> Result<NagResult, ProtocolError> {
    let malformed = || ProtocolError::MalformedSearchResult(payload.to_string());
    let mut tokens = payload.split_whitespace();
    let score = tokens.next().ok_or_else(malformed)?.parse::<i32>().map_err(|_| malformed())?;
    let best_move = tokens.next().ok_or_else(malformed)?.parse::<Point>().map_err(|_| malformed())?;
    if tokens.next().is_some() {
        return Err(malformed());
    }
    Ok(NagResult { score, best_move })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        let cmd = Command::new(
            CommandId::new(7, 4),
            CommandName::SetAlphaBeta,
            vec!["-30".to_string(), "45".to_string()],
        );
        assert_eq!(cmd.encode(), "7.4\tset_alpha_beta\t-30\t45");

        let bare = Command::new(CommandId::new(1, 1), CommandName::Version, Vec::new());
        assert_eq!(bare.encode(), "1.1\tversion");
    }

    #[test]
    fn test_reply_parse_variants() {
        let reply = Reply::parse("!=\t3.6\t-12 40").unwrap();
        assert!(reply.asynchronous);
        assert!(reply.is_success());
        assert_eq!(reply.id, CommandId::new(3, 6));
        assert_eq!(reply.payload, "-12 40");

        let reply = Reply::parse("?\t2.1\tboard too large").unwrap();
        assert!(!reply.asynchronous);
        assert_eq!(reply.status, Status::Failure);

        let reply = Reply::parse("=\t1.1").unwrap();
        assert_eq!(reply.payload, "");

        assert!(Reply::parse("?\t0.0\tbye").unwrap().is_hang_up());
        assert!(!Reply::parse("=\t0.0\t").unwrap().is_hang_up());
    }

    #[test]
    fn test_reply_parse_rejects_garbage() {
        assert!(matches!(Reply::parse("ok\t1.1\t"), Err(ProtocolError::MalformedReply(_))));
        assert!(matches!(Reply::parse("="), Err(ProtocolError::MalformedReply(_))));
        assert!(matches!(Reply::parse("=\t1\tx"), Err(ProtocolError::MalformedId(_))));
        assert!(matches!(Reply::parse("=\t1.x\tx"), Err(ProtocolError::MalformedId(_))));
        assert!(matches!(Reply::parse("!!=\t1.1\t"), Err(ProtocolError::MalformedReply(_))));
    }

    #[test]
    fn test_reply_encode_matches_parse() {
        let reply = Reply::success(CommandId::new(4, 6), "10 pass").into_async();
        assert_eq!(reply.encode(), "!=\t4.6\t10 pass");
        assert_eq!(Reply::parse(&reply.encode()).unwrap(), reply);
    }

    #[test]
    fn test_raw_command_parse() {
        let cmd = RawCommand::parse("5.2\tplay_sequence\tb\t40\tw\tpass").unwrap();
        assert_eq!(cmd.id, CommandId::new(5, 2));
        assert_eq!(cmd.name, "play_sequence");
        assert_eq!(cmd.args, vec!["b", "40", "w", "pass"]);
        assert!(RawCommand::parse("5.2").is_err());
        assert!(RawCommand::parse("\tversion").is_err());
    }

    #[test]
    fn test_history_args_pairs() {
        let history = vec![
            Move::new(Side::Black, Point::new(40)),
            Move::new(Side::White, Point::PASS),
        ];
        let args = history_args(&history);
        assert_eq!(args, vec!["b", "40", "w", "pass"]);
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        assert_eq!(parse_history(&borrowed).unwrap(), history);
        assert!(parse_history(&["b"]).is_err());
        assert!(parse_history(&["x", "1"]).is_err());
    }

    #[test]
    fn test_search_payload() {
        let result = parse_search_payload(" -35\t12 ").unwrap();
        assert_eq!(result, NagResult { score: -35, best_move: Point::new(12) });
        assert!(parse_search_payload("12").is_err());
        assert!(parse_search_payload("a 12").is_err());
        assert!(parse_search_payload("1 2 3").is_err());
    }
}
