//! Bot configuration.
//!
//! Loaded from a TOML file with `[server]`, `[engine]`, `[time]`,
//! `[stream]` and `[features]` tables. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use engine_host::EngineConfig;
use game_core::TimeConfig;
use platform::{ClientConfig, RetryPolicy, StreamConfig, PROD_SERVER_URL, TEST_SERVER_URL};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("token file {0} is empty")]
    EmptyToken(PathBuf),
}

/// Platform connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Use the production server instead of the sandbox
    pub prod: bool,
    pub prod_url: String,
    pub test_url: String,
    pub prod_token_file: PathBuf,
    pub test_token_file: PathBuf,
    /// Name the bot plays under; also used to find its seat in game records
    pub bot_name: String,
    pub version: String,
    pub request_timeout_ms: u64,
    pub retry_interval_ms: u64,
    /// Seat id for self-partnered games
    pub player_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            prod: true,
            prod_url: PROD_SERVER_URL.to_string(),
            test_url: TEST_SERVER_URL.to_string(),
            prod_token_file: PathBuf::from("api_key_prod.txt"),
            test_token_file: PathBuf::from("api_key_test.txt"),
            bot_name: "TeamTitan".to_string(),
            version: concat!("v", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_ms: 2_000,
            retry_interval_ms: 100,
            player_id: None,
        }
    }
}

impl ServerConfig {
    pub fn url(&self) -> &str {
        if self.prod {
            &self.prod_url
        } else {
            &self.test_url
        }
    }

    pub fn token_file(&self) -> &Path {
        if self.prod {
            &self.prod_token_file
        } else {
            &self.test_token_file
        }
    }

    /// Reads the API token for the selected server, trimmed.
    pub fn read_token(&self) -> Result<String, ConfigError> {
        let path = self.token_file();
        let token = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let token = token.trim();
        if token.is_empty() {
            return Err(ConfigError::EmptyToken(path.to_path_buf()));
        }
        Ok(token.to_string())
    }

    pub fn client_config(&self, token: String) -> ClientConfig {
        ClientConfig {
            base_url: self.url().to_string(),
            token,
            bot_name: self.bot_name.clone(),
            version: self.version.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            retry: RetryPolicy {
                interval: Duration::from_millis(self.retry_interval_ms),
                max_attempts: None,
            },
        }
    }
}

/// Optional behaviours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Draw the principal variation as board arrows
    pub arrows: bool,
    /// Tell the engine which team the bot is on
    pub asymmetric_eval: bool,
    /// Post the evaluation in the game chat
    pub chat_eval: bool,
    pub enable_tablebase: bool,
    /// JSON object mapping FEN to move
    pub tablebase_path: PathBuf,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            arrows: false,
            asymmetric_eval: false,
            chat_eval: false,
            enable_tablebase: true,
            tablebase_path: PathBuf::from("tablebase.json"),
        }
    }
}

/// Complete bot configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub time: TimeConfig,
    pub stream: StreamConfig,
    pub features: FeatureFlags,
}

impl BotConfig {
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
