//! Configuration management for enrollwatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer defaults, an optional `enrollwatch.toml` file, environment
//! variables and command-line flags.

use crate::cli::Cli;
use crate::core::ChatId;
use crate::error::ConfigError;
use crate::feed::auth::ServiceAccountKey;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_FILE: &str = "enrollwatch.toml";

/// Shortest accepted `firestore.poll_interval_ms`.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Environment variables set by hosting platforms, and the keys they fill.
const PLATFORM_ENV: &[(&str, &str)] = &[
    ("TELEGRAM_BOT_TOKEN", "telegram.bot_token"),
    ("TELEGRAM_CHAT_ID", "telegram.chat_id"),
    ("FIREBASE_CREDS_JSON", "firestore.credentials_json"),
];

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level, used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Configuration for the Telegram messenger.
    pub telegram: TelegramConfig,
    /// Configuration for the Firestore change feed.
    pub firestore: FirestoreConfig,
    /// Configuration for the liveness endpoint.
    pub liveness: LivenessConfig,
    /// Configuration for Prometheus metrics.
    pub metrics: MetricsConfig,
}

/// Configuration for the Telegram messenger.
#[derive(Deserialize, Serialize, Clone, PartialEq)]
pub struct TelegramConfig {
    /// The bot token issued by BotFather.
    pub bot_token: String,
    /// The chat every alert is sent to.
    pub chat_id: ChatId,
    /// Base URL of the Bot API.
    pub api_url: String,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: ChatId::default(),
            api_url: "https://api.telegram.org".to_string(),
            timeout_seconds: 10,
        }
    }
}

/// Configuration for the Firestore change feed.
#[derive(Deserialize, Serialize, Clone, PartialEq)]
pub struct FirestoreConfig {
    /// The service-account key as JSON text.
    pub credentials_json: Option<String>,
    /// Path to a service-account key file, used if `credentials_json` is unset.
    pub credentials_path: Option<PathBuf>,
    /// The watched collection.
    pub collection: String,
    /// The database id within the project.
    pub database: String,
    /// How often the collection is re-read, in milliseconds.
    pub poll_interval_ms: u64,
    /// Base URL of the Firestore REST API.
    pub api_url: String,
    /// `host:port` of a Firestore emulator. Disables token exchange.
    pub emulator_host: Option<String>,
}

impl std::fmt::Debug for FirestoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreConfig")
            .field("credentials_json", &self.credentials_json.as_ref().map(|_| "<redacted>"))
            .field("credentials_path", &self.credentials_path)
            .field("collection", &self.collection)
            .field("database", &self.database)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("api_url", &self.api_url)
            .field("emulator_host", &self.emulator_host)
            .finish()
    }
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            credentials_json: None,
            credentials_path: None,
            collection: "students".to_string(),
            database: "(default)".to_string(),
            poll_interval_ms: 2000,
            api_url: "https://firestore.googleapis.com".to_string(),
            emulator_host: None,
        }
    }
}

/// Configuration for the liveness endpoint.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LivenessConfig {
    /// Serve `GET /` so a hosting platform sees the process as alive.
    pub enabled: bool,
    /// The address the HTTP server binds to.
    pub listen_address: SocketAddr,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: ([0, 0, 0, 0], 8080).into(),
        }
    }
}

/// Configuration for Prometheus metrics.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct MetricsConfig {
    /// Expose `/metrics` on the liveness server.
    pub enabled: bool,
}

impl Config {
    /// Loads the configuration from every source, highest priority last:
    /// defaults, TOML file, `ENROLLWATCH_*` variables, platform variables
    /// (`TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`, `FIREBASE_CREDS_JSON`,
    /// `PORT`) and command-line flags. The result is validated.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let config_file = match &cli.config {
            Some(path) if !path.exists() => {
                return Err(ConfigError::Invalid {
                    key: "--config",
                    reason: format!("{} does not exist", path.display()),
                });
            }
            Some(path) => path.clone(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            // e.g. ENROLLWATCH_FIRESTORE__POLL_INTERVAL_MS=5000
            .merge(Env::prefixed("ENROLLWATCH_").split("__"));

        // Secrets are taken verbatim; figment's env parsing would try to
        // read the credential JSON and numeric chat ids as structured values.
        for &(var, key) in PLATFORM_ENV {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    figment = figment.merge(Serialized::default(key, value));
                }
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                reason: format!("`{}` is not a port number", port),
            })?;
            let liveness: LivenessConfig = figment.extract_inner("liveness")?;
            let address = SocketAddr::new(liveness.listen_address.ip(), port);
            figment = figment.merge(Serialized::default(
                "liveness.listen_address",
                address.to_string(),
            ));
        }

        let config: Config = figment.merge(cli.clone()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every required setting is present and usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::Missing("telegram.bot_token"));
        }
        if self.telegram.chat_id.is_empty() {
            return Err(ConfigError::Missing("telegram.chat_id"));
        }
        let has_json = self
            .firestore
            .credentials_json
            .as_deref()
            .is_some_and(|json| !json.trim().is_empty());
        if !has_json && self.firestore.credentials_path.is_none() {
            return Err(ConfigError::Missing("firestore.credentials_json"));
        }
        if self.firestore.collection.trim().is_empty() {
            return Err(ConfigError::Missing("firestore.collection"));
        }
        if self.firestore.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid {
                key: "firestore.poll_interval_ms",
                reason: format!(
                    "{} is below the minimum of {}",
                    self.firestore.poll_interval_ms, MIN_POLL_INTERVAL_MS
                ),
            });
        }
        if self.telegram.timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "telegram.timeout_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Reads and parses the service-account key.
    pub fn service_account(&self) -> Result<ServiceAccountKey, ConfigError> {
        if let Some(json) = self
            .firestore
            .credentials_json
            .as_deref()
            .filter(|json| !json.trim().is_empty())
        {
            return ServiceAccountKey::from_json(json);
        }
        match &self.firestore.credentials_path {
            Some(path) => ServiceAccountKey::from_json(&read_credential_file(path)?),
            None => Err(ConfigError::Missing("firestore.credentials_json")),
        }
    }
}

fn read_credential_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::CredentialFile {
        path: path.display().to_string(),
        source,
    })
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            telegram: TelegramConfig::default(),
            firestore: FirestoreConfig::default(),
            liveness: LivenessConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}
