//! Background search on a predicted position.

use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, warn};

use crate::reader::{Reader, SearchProgress, SearchUpdate};
use crate::SearchResult;

/// Position a ponder search was started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PonderRoot {
    pub fen: String,
    /// Move applied on top of `fen` before searching, usually our own reply
    pub played_move: Option<String>,
}

impl PonderRoot {
    pub fn new(fen: &str, played_move: Option<&str>) -> Self {
        Self {
            fen: fen.replace('\n', ""),
            played_move: played_move.map(str::to_string),
        }
    }

    pub fn moves(&self) -> Vec<String> {
        self.played_move.iter().cloned().collect()
    }
}

/// A ponder search that is still attached to the engine.
pub(crate) struct PonderSearch {
    pub root: PonderRoot,
    started_at: Instant,
    finished_at: Option<Instant>,
    reader: Reader,
    progress: SearchProgress,
}

impl PonderSearch {
    pub fn new(root: PonderRoot, reader: Reader) -> Self {
        Self {
            root,
            started_at: Instant::now(),
            finished_at: None,
            reader,
            progress: SearchProgress::default(),
        }
    }

    fn apply(&mut self, update: SearchUpdate) {
        self.progress.apply(&update);
        if self.progress.finished && self.finished_at.is_none() {
            self.finished_at = Some(Instant::now());
        }
    }

    /// Folds in whatever the reader has delivered so far.
    pub fn poll(&mut self) {
        while let Ok(update) = self.reader.updates.try_recv() {
            self.apply(update);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.progress.finished
    }

    /// Waits up to `timeout` for the search to reach its terminal line.
    ///
    /// Returns the frozen outcome. If the engine does not answer in time the
    /// outcome holds what was seen so far, and the reader is handed back
    /// because it is still owed the search's final line.
    pub fn finish(mut self, timeout: Duration) -> (PonderOutcome, Option<Reader>) {
        self.poll();
        let deadline = Instant::now() + timeout;
        let mut unfinished = false;
        while !self.progress.finished {
            match self.reader.updates.recv_deadline(deadline) {
                Ok(update) => self.apply(update),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "ponder did not stop in time; retiring its reader"
                    );
                    unfinished = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let elapsed = self
            .finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started_at);
        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            depth = ?self.progress.depth,
            best = ?self.progress.best_move,
            "ponder finished"
        );
        let outcome = PonderOutcome {
            root: self.root,
            elapsed,
            progress: self.progress,
        };
        (outcome, unfinished.then_some(self.reader))
    }
}

/// The last result of a stopped ponder search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PonderOutcome {
    pub root: PonderRoot,
    /// How long the background search ran
    pub elapsed: Duration,
    pub progress: SearchProgress,
}

impl PonderOutcome {
    /// The reply the ponder search expected from the opponent.
    pub fn predicted_move(&self) -> Option<&str> {
        self.progress.best_move.as_deref()
    }

    /// Reuses the ponder result if the prediction came true and the
    /// background search ran long enough to be worth more than a fresh one.
    ///
    /// The result is the ponder PV shifted by one ply.
    pub fn hit(
        &self,
        budget: Duration,
        last_opponent_move: Option<&str>,
        min_ratio: f64,
    ) -> Option<SearchResult> {
        let last_move = last_opponent_move?;
        if self.elapsed.as_secs_f64() < budget.as_secs_f64() * min_ratio {
            return None;
        }
        if self.predicted_move() != Some(last_move) {
            return None;
        }
        let pv = &self.progress.pv;
        if pv.len() < 2 {
            return None;
        }
        Some(SearchResult {
            best_move: pv[1].clone(),
            principal_variation: pv[1..].to_vec(),
            score: self.progress.score,
            depth: self.progress.depth,
            game_over: false,
            ponder_hit: true,
        })
    }
}
