//! Core game vocabulary for the four-player bot
//!
//! This crate provides:
//! - Time controls and the per-move time allocator
//! - PGN4 game-record parsing (time control, team, ply count, last move)
//! - Start position FENs for the platform's position shorthands

pub mod pgn4;
pub mod start_positions;
pub mod time_control;

// Re-export the session-level vocabulary shared by the engine host and the bot
pub use pgn4::{standardize_move, HalfMove, SessionMetadata, Team, PLIES_PER_MOVE};
pub use start_positions::*;
pub use time_control::*;
