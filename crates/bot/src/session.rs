//! Game session: turns stream events into engine work and moves.
//!
//! ```text
//! AwaitingGame ──your turn──▶ OurTurn ──move sent──▶ OpponentTurn
//!      ▲                        ▲  │                     │
//!      │                        │  └────game over───▶ GameOver
//!      └──── new game id ◀──────┴──────your turn─────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use engine_host::{EngineError, EngineSupervisor, GameOverHook, SearchResult};
use game_core::{resolve_position, SessionMetadata, Team, TimeConfig, TimeControl};
use platform::{EventHandler, Flow, PlatformApi, PlatformError, StreamEvent, StreamInfo};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::tablebase::Tablebase;

/// Marker the platform puts in the position of a finished game.
const GAME_OVER_MARKER: &str = "gameOver";
/// Arrow strength suffix and number of PV moves drawn.
const ARROW_SUFFIX: &str = "-50";
const ARROW_MOVES: usize = 4;
/// Plies after which the evaluation is posted in the chat.
const CHAT_EVAL_MIN_PLY: u32 = 2;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingGame,
    OurTurn,
    OpponentTurn,
    GameOver,
}

/// Behaviour switches for a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Name the bot is seated under in game records
    pub bot_name: String,
    pub arrows: bool,
    pub asymmetric_eval: bool,
    pub chat_eval: bool,
    pub enable_tablebase: bool,
    pub ponder: bool,
    /// Submit moves for this seat (self-partnered games)
    pub player_id: Option<String>,
}

impl SessionOptions {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            bot_name: config.server.bot_name.clone(),
            arrows: config.features.arrows,
            asymmetric_eval: config.features.asymmetric_eval,
            chat_eval: config.features.chat_eval,
            enable_tablebase: config.features.enable_tablebase,
            ponder: config.engine.ponder,
            player_id: config.server.player_id.clone(),
        }
    }
}

/// Sends the one "gg" of a game, from whichever thread sees the end first.
#[derive(Clone)]
struct GameOverNotifier {
    api: Arc<dyn PlatformApi>,
    sent: Arc<AtomicBool>,
}

impl GameOverNotifier {
    fn notify(&self) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("game over");
        if let Err(e) = self.api.chat("gg") {
            warn!(error = %e, "failed to send gg");
        }
    }

    fn reset(&self) {
        self.sent.store(false, Ordering::SeqCst);
    }

    fn hook(&self) -> GameOverHook {
        let notifier = self.clone();
        Box::new(move || notifier.notify())
    }
}

/// State of the game the bot is currently playing.
pub struct GameSession {
    api: Arc<dyn PlatformApi>,
    engine: EngineSupervisor,
    tablebase: Tablebase,
    time: TimeConfig,
    options: SessionOptions,
    state: SessionState,
    metadata: Option<SessionMetadata>,
    game_id: Option<String>,
    game_over: GameOverNotifier,
    last_arrows: Option<String>,
}

impl GameSession {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        engine: EngineSupervisor,
        tablebase: Tablebase,
        time: TimeConfig,
        options: SessionOptions,
    ) -> Self {
        let game_over = GameOverNotifier {
            api: Arc::clone(&api),
            sent: Arc::new(AtomicBool::new(false)),
        };
        Self {
            api,
            engine,
            tablebase,
            time,
            options,
            state: SessionState::AwaitingGame,
            metadata: None,
            game_id: None,
            game_over,
            last_arrows: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut EngineSupervisor {
        &mut self.engine
    }

    /// Processes one stream event.
    ///
    /// Returns [`Flow::Reconnect`] once the game is over.
    pub fn handle_event(&mut self, event: &StreamEvent) -> Result<Flow, SessionError> {
        if let Some(pgn4) = &event.pgn4 {
            self.update_metadata(pgn4)?;
        }

        let Some(info) = event.info_kind() else {
            return Ok(Flow::Continue);
        };
        match info {
            StreamInfo::GameStarting | StreamInfo::NoGameFound => Ok(Flow::Continue),
            StreamInfo::NotYourTurn => {
                self.state = SessionState::OpponentTurn;
                self.ponder_on_event(event);
                Ok(Flow::Continue)
            }
            StreamInfo::YourTurn => self.play_turn(event),
            StreamInfo::Other(text) => {
                debug!(info = %text, "ignoring stream info");
                Ok(Flow::Continue)
            }
        }
    }

    fn update_metadata(&mut self, pgn4: &str) -> Result<(), SessionError> {
        // Records without a time control come before the game starts; the
        // previous metadata stays in place.
        let Some(metadata) = SessionMetadata::parse(pgn4, &self.options.bot_name) else {
            return Ok(());
        };

        if self.options.asymmetric_eval {
            self.engine.set_team(metadata.team)?;
        }
        if metadata.game_id.is_some() && metadata.game_id != self.game_id {
            info!(
                game = ?metadata.game_id,
                time_control = %metadata.time_control,
                team = %metadata.team,
                "new game"
            );
            self.game_id = metadata.game_id.clone();
            self.game_over.reset();
            self.engine.discard_ponder();
            self.last_arrows = None;
            self.state = SessionState::AwaitingGame;
        }
        self.metadata = Some(metadata);
        Ok(())
    }

    fn ponder_on_event(&mut self, event: &StreamEvent) {
        if !self.options.ponder || self.engine.is_pondering() {
            return;
        }
        let Some(raw) = event.position() else {
            return;
        };
        if raw.contains(GAME_OVER_MARKER) {
            return;
        }
        let fen = resolve_position(&raw);
        if let Err(e) = self.engine.ponder(&fen, None, self.game_over.hook()) {
            warn!(error = %e, "failed to start ponder");
        }
    }

    fn play_turn(&mut self, event: &StreamEvent) -> Result<Flow, SessionError> {
        self.state = SessionState::OurTurn;
        let Some(raw) = event.position() else {
            warn!("our turn but the event has no position");
            return Ok(Flow::Continue);
        };
        if raw.contains(GAME_OVER_MARKER) {
            return Ok(self.finish_game());
        }
        let fen = resolve_position(&raw).into_owned();

        let tablebase_move = if self.options.enable_tablebase {
            self.tablebase.lookup(&fen).map(str::to_string)
        } else {
            None
        };
        let mv = match tablebase_move {
            Some(mv) => {
                info!(%mv, "tablebase move");
                mv
            }
            None => {
                let result = self.search(&fen, event.clock)?;
                if result.game_over {
                    return Ok(self.finish_game());
                }
                self.chat_eval(&result);
                result.best_move
            }
        };

        self.submit(&mv)?;
        self.state = SessionState::OpponentTurn;

        if self.options.ponder {
            if let Err(e) = self.engine.ponder(&fen, Some(&mv), self.game_over.hook()) {
                warn!(error = %e, "failed to start ponder");
            }
        }
        Ok(Flow::Continue)
    }

    fn search(&mut self, fen: &str, clock: Option<u64>) -> Result<SearchResult, SessionError> {
        self.engine.set_position(fen, &[])?;

        let (time_control, ply, last_move) = match &self.metadata {
            Some(m) => (m.time_control, m.ply_count, m.last_opponent_move.clone()),
            None => {
                warn!("no game record yet; assuming no increment");
                (TimeControl::default(), 0, None)
            }
        };
        let clock_ms = clock.unwrap_or_else(|| {
            warn!("our turn without a clock; assuming it is empty");
            0
        });
        let budget_ms = self.time.allocate(&time_control, clock_ms, ply);
        debug!(budget_ms, clock_ms, ply, "searching");

        let api = &self.api;
        let last_arrows = &mut self.last_arrows;
        let mut show_arrows = |pv: &[String]| draw_arrows(api.as_ref(), last_arrows, pv);
        let on_pv: Option<&mut dyn FnMut(&[String])> = if self.options.arrows {
            Some(&mut show_arrows)
        } else {
            None
        };

        let result = self.engine.best_move(budget_ms, on_pv, last_move.as_deref())?;
        Ok(result)
    }

    fn chat_eval(&self, result: &SearchResult) {
        if !self.options.chat_eval {
            return;
        }
        let Some(metadata) = &self.metadata else {
            return;
        };
        if metadata.ply_count <= CHAT_EVAL_MIN_PLY {
            return;
        }
        let Some(message) = eval_message(result, metadata.team) else {
            return;
        };
        if let Err(e) = self.api.chat(&message) {
            warn!(error = %e, "failed to send evaluation");
        }
    }

    fn submit(&self, mv: &str) -> Result<(), SessionError> {
        info!(%mv, "playing");
        match &self.options.player_id {
            Some(player_id) => self.api.play_selfpartner(mv, player_id)?,
            None => self.api.play(mv)?,
        }
        Ok(())
    }

    fn finish_game(&mut self) -> Flow {
        if self.options.arrows {
            if let Err(e) = self.api.arrow("clear") {
                warn!(error = %e, "failed to clear arrows");
            }
            self.last_arrows = None;
        }
        self.game_over.notify();
        self.engine.discard_ponder();
        self.state = SessionState::GameOver;
        Flow::Reconnect
    }
}

impl EventHandler for GameSession {
    type Error = SessionError;

    fn handle_event(&mut self, event: &StreamEvent) -> Result<Flow, SessionError> {
        GameSession::handle_event(self, event)
    }
}

/// Arrow request for the first moves of `pv`: `clear,<m1>-50,<m2>-50,...`.
pub fn arrow_request(pv: &[String]) -> String {
    std::iter::once("clear".to_string())
        .chain(
            pv.iter()
                .take(ARROW_MOVES)
                .map(|mv| format!("{mv}{ARROW_SUFFIX}")),
        )
        .collect::<Vec<_>>()
        .join(",")
}

fn draw_arrows(api: &dyn PlatformApi, last: &mut Option<String>, pv: &[String]) {
    let request = arrow_request(pv);
    if last.as_deref() == Some(request.as_str()) {
        return;
    }
    if let Err(e) = api.arrow(&request) {
        warn!(error = %e, "failed to draw arrows");
    }
    *last = Some(request);
}

/// Evaluation chat line in pawns from Red/Yellow's point of view.
///
/// Engine scores are for the side to move; a ponder hit was searched from
/// the opponent's seat, so its sign flips once more. No message is built
/// without a team or a score.
pub fn eval_message(result: &SearchResult, team: Team) -> Option<String> {
    let score = result.score? as f64 / 100.0;
    let mut pawns = match team {
        Team::RedYellow => score,
        Team::BlueGreen => -score,
        Team::None => return None,
    };
    if result.ponder_hit {
        pawns = -pawns;
    }
    let mut message = format!("score: {pawns:.2}");
    if let Some(depth) = result.depth {
        message.push_str(&format!(", depth: {depth}"));
    }
    Some(message)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
