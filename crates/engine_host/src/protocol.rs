//! The engine's line protocol.
//!
//! Commands go in one per line ([`EngineCommand`]); every line the engine
//! prints is classified once by [`EngineLine::parse`]. Lines that look like
//! search info but lack a required field are reported as
//! [`EngineLine::Malformed`] rather than silently ignored.

use std::fmt;

/// A command understood by the engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// `position fen <FEN> [moves <m1> <m2> ...]`
    Position { fen: String, moves: Vec<String> },
    /// `go movetime <ms> [depth <d>]`
    Go { movetime_ms: u64, depth: Option<u32> },
    /// `stop`
    Stop,
    /// `setoption name <key> value <value>`
    SetOption { name: String, value: String },
    /// `get_num_legal_moves`
    GetNumLegalMoves,
}

impl EngineCommand {
    pub fn position(fen: &str, moves: &[String]) -> Self {
        EngineCommand::Position {
            fen: fen.replace('\n', ""),
            moves: moves.to_vec(),
        }
    }

    pub fn set_option(name: &str, value: impl ToString) -> Self {
        EngineCommand::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Position { fen, moves } => {
                write!(f, "position fen {fen}")?;
                if !moves.is_empty() {
                    write!(f, " moves {}", moves.join(" "))?;
                }
                Ok(())
            }
            EngineCommand::Go { movetime_ms, depth } => {
                write!(f, "go movetime {movetime_ms}")?;
                if let Some(d) = depth {
                    write!(f, " depth {d}")?;
                }
                Ok(())
            }
            EngineCommand::Stop => f.write_str("stop"),
            EngineCommand::SetOption { name, value } => {
                write!(f, "setoption name {name} value {value}")
            }
            EngineCommand::GetNumLegalMoves => f.write_str("get_num_legal_moves"),
        }
    }
}

/// One `info ... pv ...` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: u32,
    /// Time spent on the search so far
    pub time_ms: u64,
    /// Centipawns, from the side to move's point of view
    pub score: i32,
    pub pv: Vec<String>,
    pub nodes: Option<u64>,
}

impl InfoLine {
    /// Whether this line is deep enough to be worth reporting to a PV
    /// listener. Early iterations come in bursts and change every few ms.
    pub fn worth_reporting(&self) -> bool {
        self.depth >= 15 || (self.time_ms >= 500 && self.depth >= 10)
    }
}

/// Classification of one line of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    /// Search progress with a principal variation
    Info(InfoLine),
    /// Final answer of a search
    BestMove(String),
    /// The game ended outside the engine's control
    GameCompleted,
    /// Reply to `get_num_legal_moves`
    LegalMoves(u32),
    /// Looked like a known line kind but could not be parsed
    Malformed { line: String, reason: &'static str },
    /// Anything else (`id ...`, `info string ...`, blank lines)
    Other,
}

const INFO_KEYWORDS: &[&str] = &["depth", "time", "nodes", "score", "nps", "pv"];

impl EngineLine {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.contains("Game completed") {
            EngineLine::GameCompleted
        } else if line.contains(" pv ") {
            parse_info(line)
        } else if line.contains("n_legal") {
            parse_legal_moves(line)
        } else if line.contains("bestmove") {
            parse_best_move(line)
        } else {
            EngineLine::Other
        }
    }

    /// Whether this line ends a running search.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineLine::BestMove(_) | EngineLine::GameCompleted)
    }
}

fn malformed(line: &str, reason: &'static str) -> EngineLine {
    EngineLine::Malformed {
        line: line.to_string(),
        reason,
    }
}

fn value_after<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
    let idx = tokens.iter().position(|&t| t == key)?;
    let value = *tokens.get(idx + 1)?;
    // `score cp 35` is accepted as well as the engine's own `score 35`
    if key == "score" && value == "cp" {
        return tokens.get(idx + 2).copied();
    }
    Some(value)
}

fn parse_info(line: &str) -> EngineLine {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let Some(depth) = value_after(&tokens, "depth").and_then(|v| v.parse().ok()) else {
        return malformed(line, "missing depth");
    };
    let Some(time_ms) = value_after(&tokens, "time").and_then(|v| v.parse().ok()) else {
        return malformed(line, "missing time");
    };
    let Some(score) = value_after(&tokens, "score").and_then(|v| v.parse().ok()) else {
        return malformed(line, "missing score");
    };
    let nodes = value_after(&tokens, "nodes").and_then(|v| v.parse().ok());

    let pv: Vec<String> = tokens
        .iter()
        .skip_while(|&&t| t != "pv")
        .skip(1)
        .take_while(|t| !INFO_KEYWORDS.contains(t))
        .map(|t| t.to_string())
        .collect();
    if pv.is_empty() {
        return malformed(line, "empty pv");
    }

    EngineLine::Info(InfoLine {
        depth,
        time_ms,
        score,
        pv,
        nodes,
    })
}

fn parse_best_move(line: &str) -> EngineLine {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match value_after(&tokens, "bestmove") {
        Some(mv) => EngineLine::BestMove(mv.to_string()),
        None => malformed(line, "bestmove without a move"),
    }
}

fn parse_legal_moves(line: &str) -> EngineLine {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match value_after(&tokens, "n_legal").and_then(|v| v.parse().ok()) {
        Some(n) => EngineLine::LegalMoves(n),
        None => malformed(line, "n_legal without a count"),
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod protocol_tests;
