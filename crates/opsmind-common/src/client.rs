use std::time::Duration;

use secrecy::SecretString;

use crate::api::DEFAULT_USER_ID;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Configuration for retry behavior with exponential backoff.
///
/// Applies to non-streaming requests only. Retries are off by default: a chat
/// send is not idempotent, so callers must opt in.
///
/// # Example
///
/// ```
/// use opsmind_common::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig {
///     max_retries: 2,
///     initial_delay: Duration::from_millis(250),
///     max_delay: Duration::from_secs(5),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts before failing.
    pub max_retries: u32,
    /// Initial delay before the first retry attempt.
    pub initial_delay: Duration,
    /// Maximum delay between retry attempts (caps exponential growth).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Connection settings for the remote assistant API.
///
/// # Example
///
/// ```
/// use opsmind_common::Config;
///
/// let config = Config::new("http://ops.internal:8000/api")
///     .with_user_id("alice")
///     .with_timeout_seconds(120);
///
/// assert_eq!(config.endpoint("chat/send"), "http://ops.internal:8000/api/chat/send");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL the endpoint paths are appended to (e.g. `http://host:8000/api`).
    pub base_url: String,
    /// Caller identity sent with chat requests.
    pub user_id: String,
    /// Optional bearer token, sent as `Authorization: Bearer <token>`.
    pub api_token: Option<SecretString>,
    /// Request timeout in seconds. `None` leaves timeouts to the transport defaults.
    pub timeout_seconds: Option<u64>,
    /// Transport-level retry behavior for non-streaming calls.
    pub retry_config: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            api_token: None,
            timeout_seconds: None,
            retry_config: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Creates a configuration for the given base URL with default settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Sets the caller identity.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Sets the bearer token.
    ///
    /// The token is stored as a `SecretString` and never shows up in `Debug` output.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(SecretString::from(token.into()));
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Sets the retry behavior.
    #[must_use]
    pub const fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Joins an endpoint path onto the base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse as an absolute URL or the
    /// user id is empty.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid base URL '{}': {e}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Unsupported URL scheme '{}'", url.scheme());
        }
        if self.user_id.trim().is_empty() {
            anyhow::bail!("User id cannot be empty");
        }
        Ok(())
    }
}
