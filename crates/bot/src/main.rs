//! Variants bot CLI
//!
//! Connects to the platform, streams game events and plays with the
//! external engine until killed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bot::{BotConfig, GameSession, SessionOptions, Tablebase};
use clap::Parser;
use engine_host::{ChildProcess, EngineSupervisor};
use platform::{HttpPlatform, PlatformApi, StreamConsumer};
use tracing::info;

/// Command-line flags; each one overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "bot", version, about = "Four-player variants bot")]
struct Cli {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Play on the production server (false = sandbox)
    #[arg(long)]
    prod: Option<bool>,

    /// Engine threads
    #[arg(long)]
    num_threads: Option<u32>,

    /// Depth cap for every search
    #[arg(long)]
    max_depth: Option<u32>,

    /// Draw the principal variation as arrows
    #[arg(long)]
    arrows: Option<bool>,

    /// Tell the engine which team the bot is on
    #[arg(long)]
    asymmetric_eval: Option<bool>,

    /// Post the evaluation in the game chat
    #[arg(long)]
    chat_eval: Option<bool>,

    #[arg(long)]
    enable_tablebase: Option<bool>,

    /// Search during the opponents' turns
    #[arg(long)]
    ponder: Option<bool>,

    /// Engine executable
    #[arg(long)]
    engine: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> Result<BotConfig> {
        let mut config = match &self.config {
            Some(path) => BotConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => BotConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut BotConfig) {
        if let Some(prod) = self.prod {
            config.server.prod = prod;
        }
        if let Some(threads) = self.num_threads {
            config.engine.threads = threads;
        }
        if let Some(depth) = self.max_depth {
            config.engine.max_depth = Some(depth);
        }
        if let Some(arrows) = self.arrows {
            config.features.arrows = arrows;
        }
        if let Some(asymmetric) = self.asymmetric_eval {
            config.features.asymmetric_eval = asymmetric;
        }
        if let Some(chat_eval) = self.chat_eval {
            config.features.chat_eval = chat_eval;
        }
        if let Some(tablebase) = self.enable_tablebase {
            config.features.enable_tablebase = tablebase;
        }
        if let Some(ponder) = self.ponder {
            config.engine.ponder = ponder;
        }
        if let Some(engine) = &self.engine {
            config.engine.path = engine.clone();
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let token = config
        .server
        .read_token()
        .context("reading the API token")?;
    let api: Arc<dyn PlatformApi> = Arc::new(
        HttpPlatform::new(config.server.client_config(token))
            .context("building the HTTP client")?,
    );
    info!(
        url = config.server.url(),
        bot = %config.server.bot_name,
        "platform client ready"
    );

    let tablebase = if config.features.enable_tablebase {
        Tablebase::load(&config.features.tablebase_path).context("loading the tablebase")?
    } else {
        Tablebase::default()
    };

    let factory = ChildProcess::factory(config.engine.path.clone(), config.engine.args.clone());
    let engine = EngineSupervisor::new(factory, config.engine.clone())
        .with_context(|| format!("starting engine {}", config.engine.path.display()))?;
    info!(
        threads = config.engine.threads,
        max_depth = ?config.engine.max_depth,
        ponder = config.engine.ponder,
        "engine ready"
    );

    let mut session = GameSession::new(
        Arc::clone(&api),
        engine,
        tablebase,
        config.time.clone(),
        SessionOptions::from_config(&config),
    );
    StreamConsumer::new(api, config.stream.clone()).run(&mut session);
    Ok(())
}
