//! Variants bot
//!
//! This crate wires the pieces together:
//! - Configuration from a TOML file and a token file
//! - The static FEN to move tablebase
//! - The per-game session that turns stream events into moves
//!
//! # Usage
//!
//! ```bash
//! # Play on the sandbox server with pondering
//! cargo run --release -p bot -- --prod false --ponder true
//!
//! # Use a config file and show PV arrows
//! cargo run --release -p bot -- --config bot.toml --arrows true
//! ```

mod config;
mod session;
mod tablebase;

pub use config::*;
pub use session::*;
pub use tablebase::*;
