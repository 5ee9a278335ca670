//! Event stream decoding.
//!
//! The platform sends newline-delimited JSON objects, but reads do not line
//! up with lines: one read may carry several events, half an event, or a
//! heartbeat. [`StreamDecoder`] reassembles fragments and decodes whatever
//! is complete.

use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

/// Default cap for an unterminated fragment.
pub const DEFAULT_MAX_FRAGMENT_BYTES: usize = 1 << 20;

/// `move` member of a stream event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MoveEvent {
    pub fen: Option<String>,
    #[serde(rename = "atMove")]
    pub at_move: Option<serde_json::Value>,
}

/// One decoded stream event. Every member is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamEvent {
    /// Full game record
    pub pgn4: Option<String>,
    pub info: Option<String>,
    pub fen4: Option<String>,
    #[serde(rename = "move")]
    pub mv: Option<MoveEvent>,
    /// Our remaining clock in milliseconds
    #[serde(default, deserialize_with = "lenient_millis")]
    pub clock: Option<u64>,
}

/// What an event's `info` text announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInfo {
    GameStarting,
    NoGameFound,
    NotYourTurn,
    YourTurn,
    Other(String),
}

impl StreamInfo {
    pub fn parse(info: &str) -> Self {
        let info = info.trim().to_lowercase();
        if info.contains("game starting") {
            StreamInfo::GameStarting
        } else if info.contains("no game found") {
            StreamInfo::NoGameFound
        } else if info == "it's not your turn" {
            StreamInfo::NotYourTurn
        } else if info == "it's your turn" {
            StreamInfo::YourTurn
        } else {
            StreamInfo::Other(info)
        }
    }
}

impl StreamEvent {
    pub fn info_kind(&self) -> Option<StreamInfo> {
        self.info.as_deref().map(StreamInfo::parse)
    }

    /// Position carried by the event, from `fen4` or `move.fen`, with
    /// newlines removed.
    pub fn position(&self) -> Option<String> {
        self.fen4
            .as_deref()
            .or_else(|| self.mv.as_ref().and_then(|m| m.fen.as_deref()))
            .map(|fen| fen.replace('\n', ""))
    }
}

/// Accepts the clock as a JSON number (integer or float) or numeric string.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let millis = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(millis.filter(|ms| *ms >= 0.0).map(|ms| ms as u64))
}

/// Reassembles stream chunks into events.
#[derive(Debug)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    max_fragment: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAGMENT_BYTES)
    }
}

impl StreamDecoder {
    pub fn new(max_fragment: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_fragment,
        }
    }

    /// Bytes held back waiting for the rest of a fragment.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feeds one read's worth of bytes and returns the events completed by
    /// it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        // Bytes held from earlier reads are known to contain no newline.
        let mut scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(offset) = self.pending[scan_from..].iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=scan_from + offset).collect();
            events.extend(decode_fragment(&line));
            scan_from = 0;
        }

        if !self.pending.is_empty() {
            // A trailing fragment that already is a whole object need not
            // wait for its newline. Only one ending in `}` can be.
            let closed = self
                .pending
                .iter()
                .rev()
                .find(|b| !b.is_ascii_whitespace())
                == Some(&b'}');
            if let Some(event) = closed.then(|| decode_fragment(&self.pending)).flatten() {
                self.pending.clear();
                events.push(event);
            } else if self.pending.len() > self.max_fragment {
                warn!(
                    bytes = self.pending.len(),
                    limit = self.max_fragment,
                    "dropping oversized stream fragment"
                );
                self.pending.clear();
            }
        }

        events
    }
}

fn decode_fragment(raw: &[u8]) -> Option<StreamEvent> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "skipping undecodable stream fragment");
            None
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod stream_tests;
