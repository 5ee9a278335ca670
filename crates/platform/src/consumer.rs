//! Reconnecting stream consumer.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::stream::{StreamDecoder, StreamEvent, DEFAULT_MAX_FRAGMENT_BYTES};
use crate::{PlatformApi, PlatformError};

/// Bounds for the pause between stream connections.
pub const MIN_RECONNECT_DELAY_MS: u64 = 250;
pub const MAX_RECONNECT_DELAY_MS: u64 = 500;

/// Stream consumer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Pause before reopening the stream, clamped to 250..=500 ms
    pub reconnect_delay_ms: u64,
    /// Largest fragment kept while waiting for its newline
    pub max_fragment_bytes: usize,
    /// Size of each read from the stream
    pub read_buffer_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: MIN_RECONNECT_DELAY_MS,
            max_fragment_bytes: DEFAULT_MAX_FRAGMENT_BYTES,
            read_buffer_bytes: 8 * 1024,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(
            self.reconnect_delay_ms
                .clamp(MIN_RECONNECT_DELAY_MS, MAX_RECONNECT_DELAY_MS),
        )
    }
}

/// What the handler wants after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The game ended; open a fresh stream
    Reconnect,
}

/// Receives decoded events in arrival order.
pub trait EventHandler {
    type Error: fmt::Display;

    fn handle_event(&mut self, event: &StreamEvent) -> Result<Flow, Self::Error>;
}

/// Why one stream connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closed the stream
    Closed,
    /// The handler asked for a fresh stream
    GameOver,
    /// The handler failed on an event
    HandlerFailed(String),
    /// Shutdown was requested while reading
    Shutdown,
}

/// Reads the event stream and hands events to a handler, reconnecting
/// after every disconnect, error or finished game.
pub struct StreamConsumer {
    api: Arc<dyn PlatformApi>,
    config: StreamConfig,
    shutdown: Arc<AtomicBool>,
}

impl StreamConsumer {
    pub fn new(api: Arc<dyn PlatformApi>, config: StreamConfig) -> Self {
        Self {
            api,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops [`run`](Self::run) once set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Consumes one stream connection until it ends.
    pub fn run_once<H: EventHandler>(&self, handler: &mut H) -> Result<StreamEnd, PlatformError> {
        let mut stream = self.api.open_stream()?;
        let mut decoder = StreamDecoder::new(self.config.max_fragment_bytes);
        let mut buf = vec![0u8; self.config.read_buffer_bytes.max(1)];

        loop {
            if self.shutting_down() {
                return Ok(StreamEnd::Shutdown);
            }
            let n = match stream.read(&mut buf) {
                Ok(0) => return Ok(StreamEnd::Closed),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            for event in decoder.push(&buf[..n]) {
                match handler.handle_event(&event) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Reconnect) => return Ok(StreamEnd::GameOver),
                    Err(e) => return Ok(StreamEnd::HandlerFailed(e.to_string())),
                }
            }
        }
    }

    /// Runs stream connections back to back until shutdown is requested.
    ///
    /// Nothing that goes wrong inside a connection stops the loop; it is
    /// logged and followed by the reconnect delay.
    pub fn run<H: EventHandler>(&self, handler: &mut H) {
        let delay = self.config.reconnect_delay();
        info!(delay_ms = delay.as_millis() as u64, "event stream loop started");

        while !self.shutting_down() {
            match self.run_once(handler) {
                Ok(StreamEnd::Closed) => debug!("event stream closed by server"),
                Ok(StreamEnd::GameOver) => info!("game over; reopening event stream"),
                Ok(StreamEnd::HandlerFailed(e)) => {
                    warn!(error = %e, "event handling failed; reconnecting")
                }
                Ok(StreamEnd::Shutdown) => break,
                Err(e) => warn!(error = %e, "event stream failed; reconnecting"),
            }
            if self.shutting_down() {
                break;
            }
            thread::sleep(delay);
        }

        info!("event stream loop stopped");
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod consumer_tests;
