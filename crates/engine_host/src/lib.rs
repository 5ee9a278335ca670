//! Engine host for the four-player bot
//!
//! This crate owns the external search engine process:
//! - The line protocol spoken with the engine ([`protocol`])
//! - Process transport and crash recreation ([`transport`])
//! - Foreground searches, the forced-move shortcut and pondering
//!   ([`EngineSupervisor`])
//!
//! # Example
//!
//! ```no_run
//! use engine_host::{ChildProcess, EngineConfig, EngineSupervisor};
//!
//! let config = EngineConfig::default();
//! let factory = ChildProcess::factory(config.path.clone(), config.args.clone());
//! let mut engine = EngineSupervisor::new(factory, config).unwrap();
//! engine.set_position(game_core::START_FEN_NEW, &[]).unwrap();
//! let result = engine.best_move(1000, None, None).unwrap();
//! println!("{}", result.best_move);
//! ```

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod ponder;
pub mod protocol;
mod reader;
mod supervisor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use ponder::{PonderOutcome, PonderRoot};
pub use protocol::{EngineCommand, EngineLine, InfoLine};
pub use reader::{GameOverHook, SearchProgress};
pub use supervisor::*;
pub use transport::{ChildProcess, EngineTransport, TransportFactory};

/// Errors raised while driving the engine process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start engine {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("engine process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("engine i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("engine closed its command stream")]
    Disconnected,

    #[error("engine returned neither a best move nor a game-over signal")]
    NoBestMove,
}

/// Outcome of one `best_move` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub best_move: String,
    pub principal_variation: Vec<String>,
    /// Centipawns from the side to move's point of view
    pub score: Option<i32>,
    pub depth: Option<u32>,
    /// The engine reported the game as finished
    pub game_over: bool,
    /// Taken from a background search instead of a fresh one
    pub ponder_hit: bool,
}
