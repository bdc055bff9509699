//! TOML Configuration File Support
//!
//! Configuration lives at `$XDG_CONFIG_HOME/statusboard/config.toml`
//! (typically `~/.config/statusboard/config.toml`). Every section and key is
//! optional.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the daemon)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [poll]
//! interval_secs = 10
//! staleness_secs = 60
//!
//! [rules]
//! path = "/home/me/.config/statusboard/rules.md"
//! debounce_ms = 500
//!
//! [sources]
//! request_timeout_secs = 10
//! retries = 1
//!
//! [slack.work]
//! token = "xoxp-..."
//!
//! [home_assistant]
//! base_url = "http://homeassistant.local:8123"
//! token = "..."
//! washer_entity = "sensor.washer_status"
//! dryer_entity = "sensor.dryer_status"
//! temperature_entity = "sensor.living_room_temperature"
//!
//! [server]
//! listen_addr = "0.0.0.0:8765"
//!
//! [hooks]
//! pto_rewrite = true
//! ```
//!
//! # Environment Variables
//!
//! - `STATUSBOARD_RULES`: rule file path
//! - `STATUSBOARD_LISTEN`: WebSocket listen address
//! - `STATUSBOARD_POLL_SECS`: poll interval
//! - `SLACK_WORK_TOKEN` / `SLACK_HOME_TOKEN`: Slack user tokens
//! - `HOME_ASSISTANT_URL` / `HOME_ASSISTANT_TOKEN`: Home Assistant access

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sources::RetryPolicy;

const APP_DIR: &str = "statusboard";

/// Default Slack Web API base
pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// `[poll]` section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between timer-driven refreshes
    pub interval_secs: u64,
    /// Longest a client may go without a push
    pub staleness_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            staleness_secs: 60,
        }
    }
}

impl PollConfig {
    /// Poll interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Staleness window
    #[must_use]
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

/// `[rules]` section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rule file location
    pub path: PathBuf,
    /// Quiet period before a changed rule file is reloaded
    pub debounce_ms: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: default_rules_path(),
            debounce_ms: crate::conditions::DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl RulesConfig {
    /// Debounce as a duration
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// `[sources]` section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Bound on each source request
    pub request_timeout_secs: u64,
    /// Retries after a failed request
    pub retries: u32,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            retries: 1,
        }
    }
}

impl SourcesConfig {
    /// Retry policy for source fetches
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.request_timeout_secs), self.retries)
    }
}

/// One Slack account (`[slack.work]` / `[slack.home]`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackAccountConfig {
    /// User token; absent disables the account
    pub token: Option<String>,
    /// Web API base URL
    pub api_base: String,
}

impl Default for SlackAccountConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: DEFAULT_SLACK_API_BASE.to_string(),
        }
    }
}

/// `[slack]` section
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Work account
    pub work: SlackAccountConfig,
    /// Home account
    pub home: SlackAccountConfig,
}

/// `[home_assistant]` section
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Base URL (e.g., `http://homeassistant.local:8123`)
    pub base_url: Option<String>,
    /// Long-lived access token
    pub token: Option<String>,
    /// Entity reporting the washer state
    pub washer_entity: Option<String>,
    /// Entity reporting the dryer state
    pub dryer_entity: Option<String>,
    /// Entity reporting the temperature
    pub temperature_entity: Option<String>,
}

/// `[server]` section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket listen address
    pub listen_addr: SocketAddr,
    /// Concurrent display clients
    pub max_clients: usize,
    /// Pushes queued per client before it counts as lagging
    pub client_buffer: usize,
    /// Control socket path
    pub control_socket: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            max_clients: 64,
            client_buffer: 16,
            control_socket: default_runtime_dir().join("control.sock"),
        }
    }
}

/// `[hooks]` section
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Collapse out-of-office statuses into a PTO badge
    pub pto_rewrite: bool,
}

/// Complete statusboard configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusboardConfig {
    /// Poll timing
    pub poll: PollConfig,
    /// Rule file
    pub rules: RulesConfig,
    /// Source request budget
    pub sources: SourcesConfig,
    /// Slack accounts
    pub slack: SlackConfig,
    /// Home Assistant
    pub home_assistant: HomeAssistantConfig,
    /// Servers
    pub server: ServerConfig,
    /// Post-resolution hooks
    pub hooks: HooksConfig,
}

impl StatusboardConfig {
    /// Parse a TOML document, defaults filling the gaps
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would break the runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.server.max_clients == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_clients must be at least 1".to_string(),
            ));
        }
        if self.server.client_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "server.client_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("STATUSBOARD_RULES") {
            self.rules.path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("STATUSBOARD_LISTEN") {
            match addr.parse() {
                Ok(addr) => self.server.listen_addr = addr,
                Err(e) => tracing::warn!(value = %addr, error = %e, "Ignoring STATUSBOARD_LISTEN"),
            }
        }
        if let Some(secs) = lookup("STATUSBOARD_POLL_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) if secs > 0 => self.poll.interval_secs = secs,
                _ => tracing::warn!(value = %secs, "Ignoring STATUSBOARD_POLL_SECS"),
            }
        }
        if let Some(token) = lookup("SLACK_WORK_TOKEN") {
            self.slack.work.token = Some(token);
        }
        if let Some(token) = lookup("SLACK_HOME_TOKEN") {
            self.slack.home.token = Some(token);
        }
        if let Some(url) = lookup("HOME_ASSISTANT_URL") {
            self.home_assistant.base_url = Some(url);
        }
        if let Some(token) = lookup("HOME_ASSISTANT_TOKEN") {
            self.home_assistant.token = Some(token);
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }
}

/// Default config file location
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
}

/// Default rule file location
#[must_use]
pub fn default_rules_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("rules.md")
}

/// Runtime directory for the control socket and PID file
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp/statusboard-$UID/
#[must_use]
pub fn default_runtime_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join(APP_DIR)
    } else {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/{APP_DIR}-{uid}"))
    }
}

/// Load configuration from the default path
pub fn load_config() -> Result<StatusboardConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from `path` (missing file means defaults), then
/// apply environment overrides
pub fn load_config_from_path(path: Option<&Path>) -> Result<StatusboardConfig, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let contents =
                std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            let config = StatusboardConfig::from_toml(&contents)?;
            tracing::info!(path = %path.display(), "Loaded configuration from file");
            config
        }
        Some(path) => {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            StatusboardConfig::default()
        }
        None => StatusboardConfig::default(),
    };

    config.apply_env();
    config.validate()?;
    Ok(config)
}
