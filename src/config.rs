//! Configuration management for StreamTags
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::credentials::{CredentialPair, RefreshPolicy};
use crate::error::{Result, StreamTagsError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for StreamTags
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Root directory for session records and the credential file.
    /// Defaults to the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Twitch application and API settings
    #[serde(default)]
    pub twitch: TwitchConfig,
    /// Session engine settings
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Credential storage and refresh settings
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Chat transport settings
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Twitch application configuration
///
/// `access_token` and `refresh_token` are the initial pair used until a
/// stored credential record takes over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitchConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub broadcaster_id: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

fn default_token_url() -> String {
    "https://id.twitch.tv/oauth2/token".to_string()
}

fn default_api_base() -> String {
    "https://api.twitch.tv/helix".to_string()
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            broadcaster_id: String::new(),
            token_url: default_token_url(),
            api_base: default_api_base(),
            access_token: String::new(),
            refresh_token: String::new(),
        }
    }
}

/// Session engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory of per-session JSON records (default: `<data_dir>/sessions`)
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Stream latency subtracted from every new session's tag offsets
    #[serde(default = "default_delay_seconds")]
    pub default_delay_seconds: u32,
}

fn default_delay_seconds() -> u32 {
    15
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            default_delay_seconds: default_delay_seconds(),
        }
    }
}

/// Credential storage and refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Encrypted record path (default: `<data_dir>/credentials.json`)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Secret the encryption key is derived from
    #[serde(default)]
    pub encryption_secret: String,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    /// Refresh this long before the access token expires
    #[serde(default = "default_refresh_lead_seconds")]
    pub refresh_lead_seconds: u64,
    /// Delay before retrying a failed token exchange
    #[serde(default = "default_retry_interval_seconds")]
    pub retry_interval_seconds: u64,
    /// Stop retrying after this many consecutive failures (unset: never stop)
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
    /// Lifetime assumed for the initial pair, whose expiry is unknown
    #[serde(default = "default_token_lifetime_seconds")]
    pub default_token_lifetime_seconds: u64,
}

fn default_kdf_iterations() -> u32 {
    crate::credentials::cipher::DEFAULT_KDF_ITERATIONS
}

fn default_refresh_lead_seconds() -> u64 {
    300
}

fn default_retry_interval_seconds() -> u64 {
    30
}

fn default_token_lifetime_seconds() -> u64 {
    4 * 60 * 60
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: None,
            encryption_secret: String::new(),
            kdf_iterations: default_kdf_iterations(),
            refresh_lead_seconds: default_refresh_lead_seconds(),
            retry_interval_seconds: default_retry_interval_seconds(),
            max_consecutive_failures: None,
            default_token_lifetime_seconds: default_token_lifetime_seconds(),
        }
    }
}

/// Chat transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Fixed delay before reconnecting a dropped transport
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,
}

fn default_reconnect_delay_seconds() -> u64 {
    5
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_seconds: default_reconnect_delay_seconds(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StreamTagsError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| StreamTagsError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(dir) = std::env::var("STREAMTAGS_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }

        // Twitch application
        if let Ok(client_id) = std::env::var("STREAMTAGS_CLIENT_ID") {
            self.twitch.client_id = client_id;
        }
        if let Ok(client_secret) = std::env::var("STREAMTAGS_CLIENT_SECRET") {
            self.twitch.client_secret = client_secret;
        }
        if let Ok(broadcaster_id) = std::env::var("STREAMTAGS_BROADCASTER_ID") {
            self.twitch.broadcaster_id = broadcaster_id;
        }
        if let Ok(token_url) = std::env::var("STREAMTAGS_TOKEN_URL") {
            self.twitch.token_url = token_url;
        }
        if let Ok(api_base) = std::env::var("STREAMTAGS_API_BASE") {
            self.twitch.api_base = api_base;
        }
        if let Ok(access_token) = std::env::var("STREAMTAGS_ACCESS_TOKEN") {
            self.twitch.access_token = access_token;
        }
        if let Ok(refresh_token) = std::env::var("STREAMTAGS_REFRESH_TOKEN") {
            self.twitch.refresh_token = refresh_token;
        }

        // Sessions
        if let Ok(dir) = std::env::var("STREAMTAGS_SESSIONS_DIR") {
            self.sessions.dir = Some(PathBuf::from(dir));
        }
        if let Ok(delay) = std::env::var("STREAMTAGS_DELAY_SECONDS") {
            match delay.parse::<u32>() {
                Ok(v) => self.sessions.default_delay_seconds = v,
                Err(_) => tracing::warn!("Invalid STREAMTAGS_DELAY_SECONDS: {}", delay),
            }
        }

        // Credentials
        if let Ok(path) = std::env::var("STREAMTAGS_CREDENTIALS_PATH") {
            self.credentials.path = Some(PathBuf::from(path));
        }
        if let Ok(secret) = std::env::var("STREAMTAGS_ENCRYPTION_SECRET") {
            self.credentials.encryption_secret = secret;
        }
        if let Ok(iterations) = std::env::var("STREAMTAGS_KDF_ITERATIONS") {
            match iterations.parse::<u32>() {
                Ok(v) => self.credentials.kdf_iterations = v,
                Err(_) => tracing::warn!("Invalid STREAMTAGS_KDF_ITERATIONS: {}", iterations),
            }
        }
        if let Ok(lead) = std::env::var("STREAMTAGS_REFRESH_LEAD_SECONDS") {
            match lead.parse::<u64>() {
                Ok(v) => self.credentials.refresh_lead_seconds = v,
                Err(_) => tracing::warn!("Invalid STREAMTAGS_REFRESH_LEAD_SECONDS: {}", lead),
            }
        }
        if let Ok(retry) = std::env::var("STREAMTAGS_RETRY_INTERVAL_SECONDS") {
            match retry.parse::<u64>() {
                Ok(v) => self.credentials.retry_interval_seconds = v,
                Err(_) => tracing::warn!("Invalid STREAMTAGS_RETRY_INTERVAL_SECONDS: {}", retry),
            }
        }
        if let Ok(max) = std::env::var("STREAMTAGS_MAX_CONSECUTIVE_FAILURES") {
            match max.parse::<u32>() {
                Ok(v) => self.credentials.max_consecutive_failures = Some(v),
                Err(_) => tracing::warn!("Invalid STREAMTAGS_MAX_CONSECUTIVE_FAILURES: {}", max),
            }
        }

        // Transport
        if let Ok(delay) = std::env::var("STREAMTAGS_RECONNECT_DELAY_SECONDS") {
            match delay.parse::<u64>() {
                Ok(v) => self.transport.reconnect_delay_seconds = v,
                Err(_) => tracing::warn!("Invalid STREAMTAGS_RECONNECT_DELAY_SECONDS: {}", delay),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(dir) = &cli.data_dir {
            self.data_dir = Some(dir.clone());
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// Checks values every command relies on. Settings only some commands
    /// need (application credentials, the encryption secret) are checked by
    /// [`require_twitch_app`](Self::require_twitch_app) and
    /// [`require_encryption_secret`](Self::require_encryption_secret).
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("twitch.token_url", &self.twitch.token_url),
            ("twitch.api_base", &self.twitch.api_base),
        ] {
            if let Err(e) = url::Url::parse(value) {
                return Err(StreamTagsError::Config(format!(
                    "{} is not a valid URL ({}): {}",
                    name, value, e
                ))
                .into());
            }
        }

        if self.credentials.kdf_iterations == 0 {
            return Err(StreamTagsError::Config(
                "credentials.kdf_iterations must be greater than 0".to_string(),
            )
            .into());
        }

        if self.credentials.retry_interval_seconds == 0 {
            return Err(StreamTagsError::Config(
                "credentials.retry_interval_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.credentials.max_consecutive_failures == Some(0) {
            return Err(StreamTagsError::Config(
                "credentials.max_consecutive_failures must be greater than 0 when set".to_string(),
            )
            .into());
        }

        if self.credentials.refresh_lead_seconds >= self.credentials.default_token_lifetime_seconds
        {
            return Err(StreamTagsError::Config(
                "credentials.refresh_lead_seconds must be less than default_token_lifetime_seconds"
                    .to_string(),
            )
            .into());
        }

        if self.transport.reconnect_delay_seconds == 0 {
            return Err(StreamTagsError::Config(
                "transport.reconnect_delay_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Ensures the Twitch application credentials are present.
    pub fn require_twitch_app(&self) -> Result<()> {
        if self.twitch.client_id.is_empty() || self.twitch.client_secret.is_empty() {
            return Err(StreamTagsError::Config(
                "twitch.client_id and twitch.client_secret are required (or STREAMTAGS_CLIENT_ID / STREAMTAGS_CLIENT_SECRET)"
                    .to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Ensures a credential encryption secret is configured.
    pub fn require_encryption_secret(&self) -> Result<()> {
        if self.credentials.encryption_secret.is_empty() {
            return Err(StreamTagsError::Config(
                "credentials.encryption_secret is required (or STREAMTAGS_ENCRYPTION_SECRET)"
                    .to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "streamtags")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".streamtags"))
        })
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("sessions"))
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("credentials.json"))
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            lead_time: Duration::from_secs(self.credentials.refresh_lead_seconds),
            retry_interval: Duration::from_secs(self.credentials.retry_interval_seconds),
            max_consecutive_failures: self.credentials.max_consecutive_failures,
            default_token_lifetime: Duration::from_secs(
                self.credentials.default_token_lifetime_seconds,
            ),
        }
    }

    /// The externally supplied pair; its expiry is unknown.
    pub fn initial_credentials(&self) -> CredentialPair {
        CredentialPair::new(
            self.twitch.access_token.clone(),
            self.twitch.refresh_token.clone(),
            None,
        )
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.transport.reconnect_delay_seconds)
    }
}
