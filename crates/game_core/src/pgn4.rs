//! Game-record (PGN4) parsing.
//!
//! The platform attaches the full four-player game record to many stream
//! events. Only a handful of facts are needed from it: the time control,
//! the game number, which team the bot plays for, how many plies have been
//! played and what the last move was.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::time_control::TimeControl;

/// Plies in one numbered move of a four-player game.
pub const PLIES_PER_MOVE: u32 = 4;

/// The two allied pairs of seats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    RedYellow,
    BlueGreen,
    #[default]
    None,
}

impl Team {
    /// Maps a seat colour (case-insensitive) to its team.
    pub fn from_seat(color: &str) -> Self {
        match color.to_ascii_lowercase().as_str() {
            "red" | "yellow" => Team::RedYellow,
            "blue" | "green" => Team::BlueGreen,
            _ => Team::None,
        }
    }

    /// Name used for the engine's `Team` option.
    pub fn as_str(self) -> &'static str {
        match self {
            Team::RedYellow => "red_yellow",
            Team::BlueGreen => "blue_green",
            Team::None => "no_team",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One half-move token from the record, cleaned up for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalfMove {
    pub from: String,
    pub to: String,
    /// The record wrote the move with an `x` separator
    pub capture: bool,
}

impl HalfMove {
    /// Normalizes a record token such as `"Qg1xk5+"`.
    ///
    /// Check markers are dropped, and a leading run of two or more letters
    /// on either side is cut down to its last letter, which removes the
    /// piece letter but keeps the file. Returns `None` for tokens that do
    /// not contain a separator.
    pub fn parse(token: &str) -> Option<Self> {
        let token: String = token.chars().filter(|&c| c != '+').collect();
        let capture = token.contains('x');
        let separator = if capture { 'x' } else { '-' };
        let (from, to) = token.split_once(separator)?;
        Some(Self {
            from: strip_piece_letter(from).to_string(),
            to: strip_piece_letter(to).to_string(),
            capture,
        })
    }

    /// The move as the engine writes it: `from-to`.
    pub fn engine_notation(&self) -> String {
        format!("{}-{}", self.from, self.to)
    }
}

impl fmt::Display for HalfMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.capture { 'x' } else { '-' };
        write!(f, "{}{}{}", self.from, separator, self.to)
    }
}

fn strip_piece_letter(part: &str) -> &str {
    let letters = part
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_alphabetic())
        .count();
    if letters > 1 {
        &part[letters - 1..]
    } else {
        part
    }
}

/// Normalizes a record token to engine notation (`"Rxe4+"` -> `"R-e4"`).
///
/// Tokens without a separator are not moves between squares; they come back
/// with the same cleanup (check markers dropped, piece letter cut) but
/// otherwise unchanged.
pub fn standardize_move(token: &str) -> String {
    match HalfMove::parse(token) {
        Some(half_move) => half_move.engine_notation(),
        None => {
            let token: String = token.chars().filter(|&c| c != '+').collect();
            strip_piece_letter(&token).to_string()
        }
    }
}

/// Per-game facts extracted from one PGN4 blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub time_control: TimeControl,
    /// Last half-move in the record, in engine notation
    pub last_opponent_move: Option<String>,
    pub team: Team,
    /// Plies played so far
    pub ply_count: u32,
    pub game_id: Option<String>,
}

fn time_control_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"TimeControl "(.*?)\+(.*?)""#).expect("static regex"))
}

fn game_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)GameNr "(.*?)""#).expect("static regex"))
}

fn move_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.").expect("static regex"))
}

fn half_move_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)([+\w-]+)\s*(?:\{.*?\})?\s*(?:\.\.\s*|$)").expect("static regex")
    })
}

impl SessionMetadata {
    /// Parses a PGN4 record.
    ///
    /// `bot_name` is the prefix of the player tag the bot plays under; it
    /// decides the team. Returns `None` when the record carries no time
    /// control, which happens for records sent before the game starts.
    pub fn parse(pgn4: &str, bot_name: &str) -> Option<Self> {
        let caps = time_control_re().captures(pgn4)?;
        let time_control = format!("{}+{}", &caps[1], &caps[2]).parse().ok()?;

        let game_id = game_number_re()
            .captures(pgn4)
            .map(|caps| caps[1].to_string());

        let (ply_count, last_opponent_move) = parse_move_tail(pgn4);

        Some(Self {
            time_control,
            last_opponent_move,
            team: parse_team(pgn4, bot_name),
            ply_count,
            game_id,
        })
    }
}

fn parse_move_tail(pgn4: &str) -> (u32, Option<String>) {
    let last_line = pgn4.split('\n').next_back().unwrap_or_default();
    let Some(number) = move_number_re()
        .captures(last_line)
        .and_then(|caps| caps[1].parse::<u32>().ok())
    else {
        return (0, None);
    };

    let tokens: Vec<&str> = half_move_re()
        .captures_iter(last_line)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let tokens_on_line = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
    let ply_count = PLIES_PER_MOVE
        .saturating_mul(number.saturating_sub(1))
        .saturating_add(tokens_on_line);
    let last_move = tokens.last().map(|token| standardize_move(token));
    (ply_count, last_move)
}

fn parse_team(pgn4: &str, bot_name: &str) -> Team {
    let pattern = format!(
        r#"(?i)(Red|Yellow|Green|Blue) "{}"#,
        regex::escape(bot_name)
    );
    match Regex::new(&pattern) {
        Ok(re) => re
            .captures(pgn4)
            .map(|caps| Team::from_seat(&caps[1]))
            .unwrap_or_default(),
        Err(_) => Team::None,
    }
}

#[cfg(test)]
#[path = "pgn4_tests.rs"]
mod pgn4_tests;
