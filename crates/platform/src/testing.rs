//! Recording fake of [`PlatformApi`] for tests.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{EventStream, PlatformApi, PlatformError};

/// One call made against the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Play(String),
    PlaySelfPartner { mv: String, player_id: String },
    Chat(String),
    Arrow(String),
    Resign,
    OpenStream,
}

/// A scripted stream connection.
pub enum ScriptedStream {
    /// Delivered one chunk per read, then closed
    Chunks(Vec<Vec<u8>>),
    /// Delivered as chunks, then the read fails
    ChunksThenError(Vec<Vec<u8>>),
    /// Opening the stream fails with a server error
    OpenFails,
}

#[derive(Default)]
struct State {
    calls: Vec<ApiCall>,
    streams: VecDeque<ScriptedStream>,
    failing_arrows: bool,
}

/// Fake platform that records calls and serves scripted streams.
///
/// Once the scripted streams run out, opening a stream yields an empty,
/// immediately closed stream.
#[derive(Default)]
pub struct RecordingPlatform {
    state: Mutex<State>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_stream(&self, stream: ScriptedStream) {
        self.state().streams.push_back(stream);
    }

    /// Queues a stream carrying `lines`, one read per line.
    pub fn push_lines(&self, lines: &[&str]) {
        let chunks = lines.iter().map(|l| format!("{l}\n").into_bytes()).collect();
        self.push_stream(ScriptedStream::Chunks(chunks));
    }

    /// Makes every arrow request fail with a client error.
    pub fn fail_arrows(&self) {
        self.state().failing_arrows = true;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    pub fn chats(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Chat(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn moves(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Play(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn arrows(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Arrow(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ApiCall) {
        self.state().calls.push(call);
    }
}

impl PlatformApi for RecordingPlatform {
    fn play(&self, mv: &str) -> Result<(), PlatformError> {
        self.record(ApiCall::Play(mv.to_string()));
        Ok(())
    }

    fn play_selfpartner(&self, mv: &str, player_id: &str) -> Result<(), PlatformError> {
        self.record(ApiCall::PlaySelfPartner {
            mv: mv.to_string(),
            player_id: player_id.to_string(),
        });
        Ok(())
    }

    fn chat(&self, message: &str) -> Result<(), PlatformError> {
        self.record(ApiCall::Chat(message.to_string()));
        Ok(())
    }

    fn arrow(&self, request: &str) -> Result<(), PlatformError> {
        self.record(ApiCall::Arrow(request.to_string()));
        if self.state().failing_arrows {
            return Err(PlatformError::Rejected { status: 400 });
        }
        Ok(())
    }

    fn resign(&self) -> Result<(), PlatformError> {
        self.record(ApiCall::Resign);
        Ok(())
    }

    fn open_stream(&self) -> Result<EventStream, PlatformError> {
        self.record(ApiCall::OpenStream);
        let next = self.state().streams.pop_front();
        match next {
            Some(ScriptedStream::Chunks(chunks)) => Ok(Box::new(ChunkedReader::new(chunks, false))),
            Some(ScriptedStream::ChunksThenError(chunks)) => {
                Ok(Box::new(ChunkedReader::new(chunks, true)))
            }
            Some(ScriptedStream::OpenFails) => Err(PlatformError::Server { status: 503 }),
            None => Ok(Box::new(ChunkedReader::new(Vec::new(), false))),
        }
    }
}

/// Reader returning one chunk per `read` call.
pub struct ChunkedReader {
    chunks: VecDeque<Vec<u8>>,
    fail_at_end: bool,
}

impl ChunkedReader {
    pub fn new(chunks: Vec<Vec<u8>>, fail_at_end: bool) -> Self {
        Self {
            chunks: chunks.into(),
            fail_at_end,
        }
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            if self.fail_at_end {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset"));
            }
            return Ok(0);
        };
        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            self.chunks.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}
