//! Platform layer for the variants bot
//!
//! This crate provides:
//! - The [`PlatformApi`] boundary and its HTTP implementation
//! - Constant-interval retry for non-streaming calls
//! - Decoding of the newline-delimited JSON event stream
//! - The reconnecting [`StreamConsumer`] loop

use std::io::{self, Read};

use thiserror::Error;

mod client;
mod consumer;
mod retry;
mod stream;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::*;
pub use consumer::*;
pub use retry::*;
pub use stream::*;

/// Errors from talking to the platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request with status {status}")]
    Rejected { status: u16 },

    #[error("server error {status}")]
    Server { status: u16 },

    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),
}

impl PlatformError {
    /// Whether the request may succeed if sent again.
    ///
    /// Transport faults and 5xx responses are retried; 4xx responses are
    /// final.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Http(e) => e.status().map_or(true, |s| s.is_server_error()),
            PlatformError::Server { .. } | PlatformError::Io(_) => true,
            PlatformError::Rejected { .. } => false,
        }
    }
}

/// Byte stream of platform events.
pub type EventStream = Box<dyn Read + Send>;

/// The bot-facing platform API.
///
/// Shared between the session thread and engine reader threads, hence
/// `Send + Sync`.
pub trait PlatformApi: Send + Sync {
    /// Submits our move in engine notation.
    fn play(&self, mv: &str) -> Result<(), PlatformError>;

    /// Submits a move for a specific seat when the bot partners itself.
    fn play_selfpartner(&self, mv: &str, player_id: &str) -> Result<(), PlatformError>;

    fn chat(&self, message: &str) -> Result<(), PlatformError>;

    /// Draws board arrows, e.g. `clear,e2-e4-50`.
    fn arrow(&self, request: &str) -> Result<(), PlatformError>;

    fn resign(&self) -> Result<(), PlatformError>;

    /// Opens the long-lived event stream.
    fn open_stream(&self) -> Result<EventStream, PlatformError>;
}
