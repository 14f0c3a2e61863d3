//! Terminal client configuration.
//!
//! Configuration is loaded from `~/.config/opsmind/config.toml` unless a path
//! is given on the command line. Every key is optional.
//!
//! ## Example Configuration
//!
//! ```toml
//! base_url = "http://ops.internal:8000/api"
//! user_id = "alice"
//! api_token = "..."
//! timeout_seconds = 120
//! max_retries = 2
//! stream = true
//! history_file = "/home/alice/.opsmind_history"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use opsmind::{Config, RetryConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable consulted for the API token when neither the flag
/// nor the file provides one.
pub const API_TOKEN_ENV: &str = "OPSMIND_API_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CliConfig {
    /// Base URL of the assistant API, including the `/api` prefix.
    pub base_url: String,

    pub user_id: String,

    /// Sent as a bearer token when present.
    pub api_token: Option<String>,

    /// Whole-request timeout for non-streaming calls.
    pub timeout_seconds: Option<u64>,

    /// Retries for transient failures of non-streaming calls (default: 0)
    pub max_retries: u32,

    /// Stream answers as they arrive (default: true)
    pub stream: bool,

    /// Line editor history; `.opsmind_history` in the working directory when unset.
    pub history_file: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        let defaults = Config::default();
        Self {
            base_url: defaults.base_url,
            user_id: defaults.user_id,
            api_token: None,
            timeout_seconds: None,
            max_retries: 0,
            stream: true,
            history_file: None,
        }
    }
}

/// Values supplied on the command line. They win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub user_id: Option<String>,
    pub api_token: Option<String>,
    pub no_stream: bool,
}

impl CliConfig {
    /// Loads configuration.
    ///
    /// With an explicit path the file must exist. Without one the default
    /// location is tried, and a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An explicitly given file doesn't exist
    /// - The file can't be read
    /// - Deserialization fails
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Self::load_from(path);
        }

        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            None => {
                tracing::warn!("Failed to determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Returns the default configuration file path, if a config directory exists.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("opsmind").join("config.toml"))
    }

    /// Applies command line values on top of the file.
    ///
    /// The API token falls back to [`API_TOKEN_ENV`] when neither source sets it.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(base_url) = overrides.base_url {
            self.base_url = base_url;
        }
        if let Some(user_id) = overrides.user_id {
            self.user_id = user_id;
        }
        self.api_token = overrides
            .api_token
            .or(self.api_token)
            .or_else(|| std::env::var(API_TOKEN_ENV).ok())
            .filter(|token| !token.trim().is_empty());
        if overrides.no_stream {
            self.stream = false;
        }
        self
    }

    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(".opsmind_history"))
    }

    /// Builds the HTTP client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or user id is invalid.
    pub fn client_config(&self) -> Result<Config, ConfigError> {
        let mut config = Config::new(self.base_url.clone()).with_user_id(self.user_id.clone());
        if let Some(token) = &self.api_token {
            config = config.with_api_token(token.clone());
        }
        if let Some(timeout) = self.timeout_seconds {
            config = config.with_timeout_seconds(timeout);
        }
        config = config.with_retry_config(RetryConfig {
            max_retries: self.max_retries,
            ..RetryConfig::default()
        });

        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }
}
