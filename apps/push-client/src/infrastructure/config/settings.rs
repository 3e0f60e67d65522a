//! Client Configuration Settings
//!
//! Configuration types for the push client, loaded from environment
//! variables. Credentials are not configuration: they are passed to
//! `authenticate` by the caller and never stored outside the session.

use std::time::Duration;

/// Authentication policy settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// REST path for the primary-credentials request.
    pub login_path: String,
    /// REST path for the second-factor submission.
    pub second_factor_path: String,
    /// Session inactivity timeout requested at login.
    pub inactivity_timeout: Duration,
    /// Lowest inactivity timeout the policy accepts.
    pub min_inactivity_timeout: Duration,
    /// Highest inactivity timeout the policy accepts.
    pub max_inactivity_timeout: Duration,
    /// How long before expiry the renewal fires.
    pub reauth_margin: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            login_path: "/auth/session".to_string(),
            second_factor_path: "/auth/session/totp".to_string(),
            inactivity_timeout: Duration::from_secs(30 * 60),
            min_inactivity_timeout: Duration::from_secs(30),
            max_inactivity_timeout: Duration::from_secs(24 * 60 * 60),
            reauth_margin: Duration::from_secs(60),
        }
    }
}

/// Backoff settings for transport and renewal retries.
#[derive(Debug, Clone)]
pub struct BackoffSettings {
    /// Maximum retry delay for any action.
    pub max_backoff: Duration,
    /// Fixed floor added to every non-zero delay.
    pub jitter_floor: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(20),
            jitter_floor: Duration::from_millis(500),
        }
    }
}

/// Liveness monitor settings.
#[derive(Debug, Clone)]
pub struct LivenessSettings {
    /// Interval between liveness checks.
    pub check_interval: Duration,
    /// Grace added to the server's advice timeout.
    pub grace: Duration,
    /// Advice timeout assumed before the server supplies one.
    pub default_timeout: Duration,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            grace: Duration::from_secs(5),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for REST calls.
    pub base_url: String,
    /// Websocket URL for the push feed.
    pub push_url: String,
    /// Authentication policy.
    pub auth: AuthSettings,
    /// Retry backoff.
    pub backoff: BackoffSettings,
    /// Connect liveness.
    pub liveness: LivenessSettings,
}

impl ClientConfig {
    /// Create a configuration for explicit endpoints with default policy.
    #[must_use]
    pub fn new(base_url: impl Into<String>, push_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            push_url: push_url.into(),
            auth: AuthSettings::default(),
            backoff: BackoffSettings::default(),
            liveness: LivenessSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PUSH_CLIENT_BASE_URL` or
    /// `PUSH_CLIENT_STREAM_URL` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = require_env("PUSH_CLIENT_BASE_URL")?;
        let push_url = require_env("PUSH_CLIENT_STREAM_URL")?;

        let defaults = AuthSettings::default();
        let auth = AuthSettings {
            login_path: std::env::var("PUSH_CLIENT_LOGIN_PATH").unwrap_or(defaults.login_path),
            second_factor_path: std::env::var("PUSH_CLIENT_TOTP_PATH")
                .unwrap_or(defaults.second_factor_path),
            inactivity_timeout: parse_env_duration_secs(
                "PUSH_CLIENT_INACTIVITY_TIMEOUT_SECS",
                defaults.inactivity_timeout,
            ),
            min_inactivity_timeout: defaults.min_inactivity_timeout,
            max_inactivity_timeout: defaults.max_inactivity_timeout,
            reauth_margin: parse_env_duration_secs(
                "PUSH_CLIENT_REAUTH_MARGIN_SECS",
                defaults.reauth_margin,
            ),
        };

        let backoff = BackoffSettings {
            max_backoff: parse_env_duration_secs(
                "PUSH_CLIENT_MAX_BACKOFF_SECS",
                BackoffSettings::default().max_backoff,
            ),
            jitter_floor: parse_env_duration_millis(
                "PUSH_CLIENT_BACKOFF_FLOOR_MS",
                BackoffSettings::default().jitter_floor,
            ),
        };

        let liveness = LivenessSettings {
            check_interval: parse_env_duration_secs(
                "PUSH_CLIENT_LIVENESS_INTERVAL_SECS",
                LivenessSettings::default().check_interval,
            ),
            grace: parse_env_duration_secs(
                "PUSH_CLIENT_LIVENESS_GRACE_SECS",
                LivenessSettings::default().grace,
            ),
            default_timeout: parse_env_duration_secs(
                "PUSH_CLIENT_CONNECT_TIMEOUT_SECS",
                LivenessSettings::default().default_timeout,
            ),
        };

        Ok(Self {
            base_url,
            push_url,
            auth,
            backoff,
            liveness,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    let value =
        std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
