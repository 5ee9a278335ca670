//! Engine supervisor: process lifecycle, searches and pondering.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use game_core::Team;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ponder::{PonderOutcome, PonderRoot, PonderSearch};
use crate::protocol::{EngineCommand, EngineLine};
use crate::reader::{GameOverHook, Reader, SearchProgress, SearchUpdate};
use crate::transport::{EngineTransport, TransportFactory};
use crate::{EngineError, SearchResult};

/// How long a closed reader gets to exit.
const READER_EXIT_WAIT: Duration = Duration::from_millis(100);

/// Configuration for the engine process and its searches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable
    pub path: PathBuf,
    /// Extra command-line arguments for the engine
    pub args: Vec<String>,
    /// Value of the engine's `Threads` option
    pub threads: u32,
    /// Depth cap for every search (None = time only)
    pub max_depth: Option<u32>,
    /// Search on the predicted position during the opponents' turns
    pub ponder: bool,
    /// Movetime given to a ponder search; it is normally stopped long before
    pub ponder_movetime_ms: u64,
    /// A ponder result is reused only if it ran this many budgets long
    pub ponder_hit_ratio: f64,
    /// Kept back from the budget when issuing `go movetime`
    pub search_buffer_ms: u64,
    /// Smallest movetime ever sent
    pub min_search_ms: u64,
    /// Extra wait on top of budget and buffer before giving up on a search
    pub wait_slack_ms: u64,
    /// Wait for the `get_num_legal_moves` reply
    pub query_timeout_ms: u64,
    /// Wait for a stopped ponder to print its final line
    pub ponder_stop_timeout_ms: u64,
    /// Wait for abandoned searches to print their final lines before the
    /// next command
    pub settle_timeout_ms: u64,
    /// Depth used when only one legal move exists
    pub forced_move_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bazel-bin/cli"),
            args: Vec::new(),
            threads: 11,
            max_depth: None,
            ponder: false,
            ponder_movetime_ms: 600_000,
            ponder_hit_ratio: 1.5,
            search_buffer_ms: 50,
            min_search_ms: 10,
            wait_slack_ms: 5_000,
            query_timeout_ms: 1_000,
            ponder_stop_timeout_ms: 1_000,
            settle_timeout_ms: 1_000,
            forced_move_depth: 1,
        }
    }
}

/// Owns the engine process.
///
/// All commands go through `&mut self`, so the engine's command stream has a
/// single writer. At most one foreground search and one ponder search exist
/// at a time; every foreground operation stops the ponder before writing.
///
/// A search that overruns its wait is told to stop and its reader is kept as
/// retired until it consumes its own `bestmove`. Nothing new is written
/// while a retired reader is still owed its line, so late output of an old
/// search never reaches a newer one.
pub struct EngineSupervisor {
    factory: TransportFactory,
    config: EngineConfig,
    transport: Box<dyn EngineTransport>,
    team: Option<Team>,
    ponder: Option<PonderSearch>,
    /// Last result of a stopped ponder, consumed by the next `best_move`
    stopped_ponder: Option<PonderOutcome>,
    /// Readers of abandoned searches, each still owed a terminal line
    retired: Vec<Reader>,
}

impl EngineSupervisor {
    /// Starts the engine and applies the configured options.
    pub fn new(mut factory: TransportFactory, config: EngineConfig) -> Result<Self, EngineError> {
        let transport = factory()?;
        let mut supervisor = Self {
            factory,
            config,
            transport,
            team: None,
            ponder: None,
            stopped_ponder: None,
            retired: Vec::new(),
        };
        supervisor.apply_options()?;
        Ok(supervisor)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn send(&mut self, command: &EngineCommand) -> Result<(), EngineError> {
        self.transport.write_line(&command.to_string())
    }

    fn apply_options(&mut self) -> Result<(), EngineError> {
        self.send(&EngineCommand::set_option("Threads", self.config.threads))?;
        if let Some(team) = self.team {
            self.send(&EngineCommand::set_option("Team", team))?;
        }
        Ok(())
    }

    /// Recreates the engine process if it has exited.
    ///
    /// Any search state belonging to the dead process is dropped.
    pub fn ensure_alive(&mut self) -> Result<(), EngineError> {
        if self.transport.is_alive() {
            return Ok(());
        }
        warn!("engine process is gone; starting a new one");
        self.ponder = None;
        self.stopped_ponder = None;
        self.retired.clear();
        self.transport = (self.factory)()?;
        self.apply_options()
    }

    /// Makes sure no earlier search can answer the next command.
    fn quiesce(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.stop_ponder();
        self.settle();
        Ok(())
    }

    /// Waits (bounded) for every retired reader to see its terminal line.
    fn settle(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        let timeout_ms = self.config.settle_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        for reader in self.retired.drain(..) {
            if reader.wait_terminal(deadline) {
                continue;
            }
            warn!(timeout_ms, "abandoned search never finished");
            if !reader.close(READER_EXIT_WAIT) {
                warn!("abandoned reader is still busy");
            }
        }
        debug!("abandoned searches settled");
    }

    /// Drops output lines nobody is waiting for.
    fn discard_pending_output(&self) {
        let output = self.transport.output();
        let mut dropped = 0usize;
        while let Ok(line) = output.try_recv() {
            debug!(%line, "discarding stale engine output");
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "discarded stale engine output");
        }
    }

    /// Sets the position for the next search.
    pub fn set_position(&mut self, fen: &str, moves: &[String]) -> Result<(), EngineError> {
        self.quiesce()?;
        self.send(&EngineCommand::position(fen, moves))
    }

    /// Asks the engine how many legal moves the current position has.
    ///
    /// Returns `None` if the reply is anything but a legal-move count or
    /// does not arrive in time.
    pub fn num_legal_moves(&mut self) -> Result<Option<u32>, EngineError> {
        self.quiesce()?;
        self.discard_pending_output();
        self.send(&EngineCommand::GetNumLegalMoves)?;

        let timeout = Duration::from_millis(self.config.query_timeout_ms);
        match self.transport.output().recv_timeout(timeout) {
            Ok(line) => match EngineLine::parse(&line) {
                EngineLine::LegalMoves(n) => Ok(Some(n)),
                other => {
                    warn!(?other, "unexpected reply to get_num_legal_moves");
                    Ok(None)
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = self.config.query_timeout_ms, "no legal move count from engine");
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    /// Tells the engine which team the bot plays for.
    ///
    /// The team is remembered and re-applied whenever the process is
    /// recreated. Repeating the current team sends nothing.
    pub fn set_team(&mut self, team: Team) -> Result<(), EngineError> {
        if self.team == Some(team) {
            return Ok(());
        }
        self.quiesce()?;
        self.team = Some(team);
        info!(%team, "engine team set");
        self.send(&EngineCommand::set_option("Team", team))
    }

    /// Finds the move to play in the position last given to
    /// [`set_position`](Self::set_position).
    ///
    /// A stopped ponder whose prediction matches `last_opponent_move` and
    /// which ran long enough is reused without searching. Otherwise a search
    /// of `budget_ms` is started; `on_pv` sees every principal variation
    /// deep enough to be worth showing. If the engine overruns the wait, the
    /// best move seen so far is returned.
    pub fn best_move(
        &mut self,
        budget_ms: u64,
        mut on_pv: Option<&mut dyn FnMut(&[String])>,
        last_opponent_move: Option<&str>,
    ) -> Result<SearchResult, EngineError> {
        self.quiesce()?;

        if let Some(outcome) = self.stopped_ponder.take() {
            if self.config.ponder {
                let budget = Duration::from_millis(budget_ms);
                match outcome.hit(budget, last_opponent_move, self.config.ponder_hit_ratio) {
                    Some(result) => {
                        info!(
                            best_move = %result.best_move,
                            ponder_ms = outcome.elapsed.as_millis() as u64,
                            depth = ?result.depth,
                            "ponder hit"
                        );
                        return Ok(result);
                    }
                    None => debug!(
                        predicted = ?outcome.predicted_move(),
                        actual = ?last_opponent_move,
                        "ponder miss"
                    ),
                }
            }
        }

        let depth = match self.num_legal_moves()? {
            Some(1) => {
                debug!("single legal move");
                Some(self.config.forced_move_depth)
            }
            _ => self.config.max_depth,
        };
        let movetime_ms = budget_ms
            .saturating_sub(self.config.search_buffer_ms)
            .max(self.config.min_search_ms);

        self.discard_pending_output();
        let reader = Reader::spawn("engine-search", self.transport.output(), None)?;
        self.send(&EngineCommand::Go { movetime_ms, depth })?;

        let wait = budget_ms + self.config.search_buffer_ms + self.config.wait_slack_ms;
        let deadline = Instant::now() + Duration::from_millis(wait);
        let mut progress = SearchProgress::default();
        let mut overran = false;
        while !progress.finished {
            match reader.updates.recv_deadline(deadline) {
                Ok(update) => {
                    if let (SearchUpdate::Info(line), Some(callback)) =
                        (&update, on_pv.as_deref_mut())
                    {
                        if line.worth_reporting() {
                            callback(&line.pv);
                        }
                    }
                    progress.apply(&update);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        budget_ms,
                        wait_ms = wait,
                        best = ?progress.best_move,
                        "engine did not finish in time; using partial result"
                    );
                    overran = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if overran {
            if let Err(e) = self.send(&EngineCommand::Stop) {
                warn!("failed to stop overrunning search: {}", e);
            }
            self.retired.push(reader);
        }

        if progress.game_over {
            info!("engine reports the game is over");
        }
        let result = progress.into_result()?;
        debug!(
            best_move = %result.best_move,
            score = ?result.score,
            depth = ?result.depth,
            "search finished"
        );
        Ok(result)
    }

    /// Starts a background search on `fen`, optionally after `played_move`.
    ///
    /// Asking again for the position already being pondered does nothing; a
    /// different position replaces the running ponder. `on_game_over` runs
    /// on the reader thread if the engine reports the game as finished.
    pub fn ponder(
        &mut self,
        fen: &str,
        played_move: Option<&str>,
        on_game_over: GameOverHook,
    ) -> Result<(), EngineError> {
        self.ensure_alive()?;
        let root = PonderRoot::new(fen, played_move);
        if let Some(search) = self.ponder.as_mut() {
            search.poll();
            if search.root == root && !search.is_finished() {
                debug!("already pondering this position");
                return Ok(());
            }
        }
        self.stop_ponder();
        self.stopped_ponder = None;
        self.settle();
        self.discard_pending_output();

        self.send(&EngineCommand::position(&root.fen, &root.moves()))?;
        let reader = Reader::spawn("engine-ponder", self.transport.output(), Some(on_game_over))?;
        self.send(&EngineCommand::Go {
            movetime_ms: self.config.ponder_movetime_ms,
            depth: None,
        })?;
        debug!(played_move = ?root.played_move, "ponder started");
        self.ponder = Some(PonderSearch::new(root, reader));
        Ok(())
    }

    /// Whether a ponder search is still running.
    pub fn is_pondering(&mut self) -> bool {
        match self.ponder.as_mut() {
            Some(search) => {
                search.poll();
                !search.is_finished()
            }
            None => false,
        }
    }

    /// Stops the running ponder, keeping its final result for the next
    /// `best_move`. Does nothing if no ponder is running.
    pub fn stop_ponder(&mut self) {
        let Some(mut search) = self.ponder.take() else {
            return;
        };
        search.poll();
        if !search.is_finished() {
            if let Err(e) = self.send(&EngineCommand::Stop) {
                warn!("failed to stop ponder: {}", e);
            }
        }
        let timeout = Duration::from_millis(self.config.ponder_stop_timeout_ms);
        let (outcome, unfinished) = search.finish(timeout);
        self.retired.extend(unfinished);
        self.stopped_ponder = Some(outcome);
    }

    /// Forgets any ponder, running or stopped, so that nothing searched so
    /// far can be reused as a ponder hit.
    pub fn discard_ponder(&mut self) {
        self.stop_ponder();
        self.stopped_ponder = None;
    }

    /// Result of the last stopped ponder, if it has not been consumed yet.
    pub fn stopped_ponder(&self) -> Option<&PonderOutcome> {
        self.stopped_ponder.as_ref()
    }
}

impl Drop for EngineSupervisor {
    fn drop(&mut self) {
        if self.ponder.is_some() {
            let _ = self.send(&EngineCommand::Stop);
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod supervisor_tests;
