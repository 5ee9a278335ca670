//! HTTP implementation of the platform API.
//!
//! Every call is a GET on the bot endpoint with the token and one verb in
//! the query string: `?token=<t>&play=<move>`, `?token=<t>&chat=<text>`,
//! `?token=<t>&arrows=<arrows>`, `?token=<t>&play=R` and `?token=<t>&stream=1`.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::{EventStream, PlatformApi, PlatformError};

/// Production bot endpoint.
pub const PROD_SERVER_URL: &str = "https://variants.gcp-prod.chess.com/bot";
/// Sandbox bot endpoint.
pub const TEST_SERVER_URL: &str = "https://variants.gcp-sandbox.chess-platform.com/bot";

/// Connection settings for [`HttpPlatform`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    /// Reported in the User-Agent
    pub bot_name: String,
    pub version: String,
    /// Per-request ceiling for non-streaming calls
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            bot_name: "?".to_string(),
            version: "v0.1.0".to_string(),
            request_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }

    pub fn user_agent(&self) -> String {
        format!("chesscom-bot/{} user:{}", self.version, self.bot_name)
    }
}

/// Blocking HTTP client for the bot API.
pub struct HttpPlatform {
    config: ClientConfig,
    client: Client,
    /// Same headers, no overall timeout: the stream stays open for a game
    stream_client: Client,
}

impl HttpPlatform {
    pub fn new(config: ClientConfig) -> Result<Self, PlatformError> {
        let mut headers = HeaderMap::new();
        // A bot name with characters not allowed in headers falls back to "?"
        let agent = HeaderValue::from_str(&config.user_agent())
            .unwrap_or_else(|_| HeaderValue::from_static("chesscom-bot user:?"));
        headers.insert(USER_AGENT, agent);

        let client = Client::builder()
            .default_headers(headers.clone())
            .timeout(config.request_timeout)
            .build()?;
        let stream_client = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.request_timeout)
            .timeout(None)
            .build()?;

        Ok(Self {
            config,
            client,
            stream_client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn query<'a>(&'a self, params: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut query = vec![("token", self.config.token.as_str())];
        query.extend_from_slice(params);
        query
    }

    fn get_once(&self, params: &[(&str, &str)]) -> Result<Response, PlatformError> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&self.query(params))
            .send()?;
        check_status(response)
    }

    /// GET with the retry policy applied.
    fn get(&self, what: &str, params: &[(&str, &str)]) -> Result<(), PlatformError> {
        self.config.retry.run(what, || {
            let response = self.get_once(params)?;
            debug!(request = what, status = response.status().as_u16(), "platform request done");
            Ok(())
        })
    }
}

fn check_status(response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_client_error() {
        Err(PlatformError::Rejected {
            status: status.as_u16(),
        })
    } else if status.is_server_error() {
        Err(PlatformError::Server {
            status: status.as_u16(),
        })
    } else {
        Ok(response)
    }
}

impl PlatformApi for HttpPlatform {
    fn play(&self, mv: &str) -> Result<(), PlatformError> {
        self.get("play", &[("play", mv)])
    }

    fn play_selfpartner(&self, mv: &str, player_id: &str) -> Result<(), PlatformError> {
        self.get("play_selfpartner", &[("play", mv), ("playerId", player_id)])
    }

    fn chat(&self, message: &str) -> Result<(), PlatformError> {
        self.get("chat", &[("chat", message)])
    }

    fn arrow(&self, request: &str) -> Result<(), PlatformError> {
        self.get("arrow", &[("arrows", request)])
    }

    fn resign(&self) -> Result<(), PlatformError> {
        self.get("resign", &[("play", "R")])
    }

    fn open_stream(&self) -> Result<EventStream, PlatformError> {
        let response = self
            .stream_client
            .get(&self.config.base_url)
            .query(&self.query(&[("stream", "1")]))
            .send()?;
        let response = check_status(response)?;
        debug!(status = response.status().as_u16(), "event stream opened");
        Ok(Box::new(response))
    }
}
