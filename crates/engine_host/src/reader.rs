//! Search reader threads.
//!
//! Each search (foreground or ponder) gets its own reader thread and its
//! own update channel. The reader parses engine output with
//! [`EngineLine::parse`] and forwards what matters; the thread that started
//! the search folds the updates into a [`SearchProgress`].
//!
//! A reader stops reading as soon as its handle is dropped or closed.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::protocol::{EngineLine, InfoLine};
use crate::{EngineError, SearchResult};

/// What a reader thread reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SearchUpdate {
    Info(InfoLine),
    BestMove(String),
    GameCompleted,
    /// The engine's output closed mid-search
    Disconnected,
}

impl SearchUpdate {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, SearchUpdate::Info(_))
    }
}

/// Called from the reader thread when the engine reports the game is over.
pub type GameOverHook = Box<dyn FnOnce() + Send>;

/// Handle to a running reader thread.
///
/// Dropping the handle disconnects `cancel`, which the thread watches next
/// to the engine output.
pub(crate) struct Reader {
    pub updates: Receiver<SearchUpdate>,
    cancel: Sender<()>,
    _thread: JoinHandle<()>,
}

impl Reader {
    pub fn spawn(
        name: &str,
        lines: Receiver<String>,
        on_game_over: Option<GameOverHook>,
    ) -> Result<Self, EngineError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (cancel, cancelled) = crossbeam_channel::bounded(0);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || read_search(lines, tx, cancelled, on_game_over))?;
        Ok(Self {
            updates: rx,
            cancel,
            _thread: thread,
        })
    }

    /// Waits until the search reports a terminal line. Returns `false` if
    /// `deadline` passes first.
    pub fn wait_terminal(&self, deadline: Instant) -> bool {
        loop {
            match self.updates.recv_deadline(deadline) {
                Ok(update) if update.is_terminal() => return true,
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return true,
            }
        }
    }

    /// Stops the thread and waits up to `timeout` for it to exit.
    ///
    /// Returns `false` if the thread is still busy (running the game-over
    /// hook); it reads no further output in that case either.
    pub fn close(self, timeout: Duration) -> bool {
        let Reader { updates, cancel, .. } = self;
        drop(cancel);
        let deadline = Instant::now() + timeout;
        loop {
            match updates.recv_deadline(deadline) {
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return true,
            }
        }
    }
}

fn read_search(
    lines: Receiver<String>,
    updates: Sender<SearchUpdate>,
    cancelled: Receiver<()>,
    mut on_game_over: Option<GameOverHook>,
) {
    loop {
        if let Err(TryRecvError::Disconnected) = cancelled.try_recv() {
            debug!("search reader cancelled");
            return;
        }
        let line = select! {
            recv(cancelled) -> _ => {
                debug!("search reader cancelled");
                return;
            }
            recv(lines) -> line => match line {
                Ok(line) => line,
                Err(_) => {
                    let _ = updates.send(SearchUpdate::Disconnected);
                    return;
                }
            },
        };

        let update = match EngineLine::parse(&line) {
            EngineLine::Info(info) => SearchUpdate::Info(info),
            EngineLine::BestMove(mv) => SearchUpdate::BestMove(mv),
            EngineLine::GameCompleted => {
                if let Some(hook) = on_game_over.take() {
                    hook();
                }
                SearchUpdate::GameCompleted
            }
            EngineLine::Malformed { line, reason } => {
                warn!(%line, reason, "skipping malformed engine line");
                continue;
            }
            EngineLine::LegalMoves(_) | EngineLine::Other => continue,
        };

        let terminal = update.is_terminal();
        if updates.send(update).is_err() || terminal {
            return;
        }
    }
}

/// Everything learned about one search so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchProgress {
    pub best_move: Option<String>,
    pub pv: Vec<String>,
    pub score: Option<i32>,
    pub depth: Option<u32>,
    pub game_over: bool,
    /// A terminal line (or disconnect) was seen
    pub finished: bool,
}

impl SearchProgress {
    pub(crate) fn apply(&mut self, update: &SearchUpdate) {
        match update {
            SearchUpdate::Info(info) => {
                self.best_move = info.pv.first().cloned();
                self.pv = info.pv.clone();
                self.score = Some(info.score);
                self.depth = Some(info.depth);
            }
            SearchUpdate::BestMove(mv) => {
                self.best_move = Some(mv.clone());
                self.finished = true;
            }
            SearchUpdate::GameCompleted => {
                self.game_over = true;
                self.finished = true;
            }
            SearchUpdate::Disconnected => self.finished = true,
        }
    }

    /// Turns the progress into a result, failing when the engine produced
    /// neither a move nor a game-over signal.
    pub fn into_result(self) -> Result<SearchResult, EngineError> {
        if !self.game_over && self.best_move.is_none() {
            return Err(EngineError::NoBestMove);
        }
        Ok(SearchResult {
            best_move: self.best_move.unwrap_or_default(),
            principal_variation: self.pv,
            score: self.score,
            depth: self.depth,
            game_over: self.game_over,
            ponder_hit: false,
        })
    }
}
