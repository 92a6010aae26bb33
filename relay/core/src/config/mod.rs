//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, from a TOML file at
//! `~/.config/chat-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/chat-relay/relay.toml` (typically `~/.config/chat-relay/relay.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [upstream]
//! base_url = "http://127.0.0.1:8000"
//! chat_path = "/api/chat"
//! connect_timeout_ms = 10000
//!
//! [relay]
//! max_chunk_bytes = 8192
//! channel_capacity = 32
//!
//! [turn]
//! fallback_grace_ms = 1000
//! max_input_length = 32768
//! observer_capacity = 64
//!
//! [server]
//! bind_addr = "127.0.0.1:3000"
//!
//! [history]
//! dir = "/var/lib/chat-relay/history"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::UpstreamConfig;
use crate::conductor::TurnConfig;
use crate::relay::RelayConfig;

// =============================================================================
// Error Types
// =============================================================================

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

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Upstream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// Base URL of the upstream chat service
    pub base_url: Option<String>,

    /// Path prefix turns are posted under
    pub chat_path: Option<String>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Bearer token forwarded upstream
    pub auth_token: Option<String>,
}

/// Relay section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Largest chunk forwarded downstream
    pub max_chunk_bytes: Option<usize>,

    /// Chunks buffered between upstream and downstream
    pub channel_capacity: Option<usize>,
}

/// Turn section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnToml {
    /// Grace delay before the fallback apology, in milliseconds
    pub fallback_grace_ms: Option<u64>,

    /// Maximum user message length in bytes
    pub max_input_length: Option<usize>,

    /// Updates buffered for a slow observer
    pub observer_capacity: Option<usize>,

    /// Answered turns sent as upstream context (0 = all)
    pub max_context_turns: Option<usize>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address the HTTP relay listens on
    pub bind_addr: Option<String>,
}

/// History section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryToml {
    /// Directory of the JSON-lines store
    pub dir: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfigToml {
    /// Upstream configuration section
    pub upstream: UpstreamToml,

    /// Relay configuration section
    pub relay: RelayToml,

    /// Turn configuration section
    pub turn: TurnToml,

    /// Server configuration section
    pub server: ServerToml,

    /// History configuration section
    pub history: HistoryToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the relay
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct ChatRelayConfig {
    /// Upstream connection
    pub upstream: UpstreamConfig,

    /// Byte pipe tuning
    pub relay: RelayConfig,

    /// Turn lifecycle tuning
    pub turn: TurnConfig,

    /// Address the HTTP relay listens on
    pub bind_addr: SocketAddr,

    /// JSON-lines history directory (in-memory history when unset)
    pub history_dir: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ChatRelayConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            relay: RelayConfig::default(),
            turn: TurnConfig::default(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            history_dir: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ChatRelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Reject values the relay cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for zero-sized buffers or a
    /// base URL without an HTTP scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.upstream.base_url.starts_with("http://")
            || self.upstream.base_url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "upstream base_url must start with http:// or https://, got {:?}",
                self.upstream.base_url
            )));
        }
        if self.relay.max_chunk_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "relay.max_chunk_bytes must be greater than zero".to_string(),
            ));
        }
        if self.relay.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "relay.channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.turn.observer_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "turn.observer_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-relay/relay.toml` or
/// `~/.config/chat-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-relay").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ChatRelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChatRelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ChatRelayConfig, ConfigError> {
    let mut config = ChatRelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayConfigToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ChatRelayConfig, toml: &RelayConfigToml) -> Result<(), ConfigError> {
    // Upstream settings
    if let Some(ref url) = toml.upstream.base_url {
        config.upstream.base_url.clone_from(url);
    }
    if let Some(ref path) = toml.upstream.chat_path {
        config.upstream.chat_path.clone_from(path);
    }
    if let Some(timeout) = toml.upstream.connect_timeout_ms {
        config.upstream.connect_timeout = Duration::from_millis(timeout);
    }
    if toml.upstream.auth_token.is_some() {
        config.upstream.auth_token.clone_from(&toml.upstream.auth_token);
    }

    // Relay settings
    if let Some(size) = toml.relay.max_chunk_bytes {
        config.relay.max_chunk_bytes = size;
    }
    if let Some(capacity) = toml.relay.channel_capacity {
        config.relay.channel_capacity = capacity;
    }

    // Turn settings
    if let Some(grace) = toml.turn.fallback_grace_ms {
        config.turn.fallback_grace = Duration::from_millis(grace);
    }
    if let Some(length) = toml.turn.max_input_length {
        config.turn.max_input_length = length;
    }
    if let Some(capacity) = toml.turn.observer_capacity {
        config.turn.observer_capacity = capacity;
    }
    if let Some(turns) = toml.turn.max_context_turns {
        config.turn.max_context_turns = turns;
    }

    // Server settings
    if let Some(ref addr) = toml.server.bind_addr {
        config.bind_addr = addr.parse().map_err(|e| {
            ConfigError::ValidationError(format!("server.bind_addr {addr:?}: {e}"))
        })?;
    }

    // History settings
    if toml.history.dir.is_some() {
        config.history_dir.clone_from(&toml.history.dir);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ChatRelayConfig, env: impl Fn(&str) -> Option<String>) {
    // Upstream settings from environment
    if let Some(url) = env("RELAY_UPSTREAM_URL") {
        config.upstream.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("RELAY_CHAT_PATH") {
        config.upstream.chat_path = path;
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("RELAY_CONNECT_TIMEOUT") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.upstream.connect_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(token) = env("RELAY_AUTH_TOKEN") {
        config.upstream.auth_token = Some(token);
        config.source = ConfigSource::Env;
    }

    // Relay settings from environment
    if let Some(size) = env("RELAY_MAX_CHUNK_BYTES") {
        if let Ok(s) = size.parse::<usize>() {
            config.relay.max_chunk_bytes = s;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(capacity) = env("RELAY_CHANNEL_CAPACITY") {
        if let Ok(c) = capacity.parse::<usize>() {
            config.relay.channel_capacity = c;
            config.source = ConfigSource::Env;
        }
    }

    // Turn settings from environment
    if let Some(grace) = env("RELAY_FALLBACK_GRACE_MS") {
        if let Ok(ms) = grace.parse::<u64>() {
            config.turn.fallback_grace = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(length) = env("RELAY_MAX_INPUT_LENGTH") {
        if let Ok(l) = length.parse::<usize>() {
            config.turn.max_input_length = l;
            config.source = ConfigSource::Env;
        }
    }

    // Server settings from environment
    if let Some(addr) = env("RELAY_BIND_ADDR") {
        match addr.parse::<SocketAddr>() {
            Ok(a) => {
                config.bind_addr = a;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(value = %addr, error = %e, "Ignoring invalid RELAY_BIND_ADDR"),
        }
    }

    // History settings from environment
    if let Some(dir) = env("RELAY_HISTORY_DIR") {
        config.history_dir = Some(PathBuf::from(dir));
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Upstream base URL override
    pub upstream_url: Option<String>,

    /// Bind address override
    pub bind_addr: Option<SocketAddr>,

    /// History directory override
    pub history_dir: Option<PathBuf>,

    /// Fallback grace override (milliseconds)
    pub fallback_grace_ms: Option<u64>,

    /// Bearer token override
    pub auth_token: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set upstream URL override
    #[must_use]
    pub fn with_upstream_url(mut self, url: String) -> Self {
        self.upstream_url = Some(url);
        self
    }

    /// Set bind address override
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Set history directory override
    #[must_use]
    pub fn with_history_dir(mut self, dir: PathBuf) -> Self {
        self.history_dir = Some(dir);
        self
    }

    /// Set fallback grace override
    #[must_use]
    pub fn with_fallback_grace_ms(mut self, ms: u64) -> Self {
        self.fallback_grace_ms = Some(ms);
        self
    }

    /// Set bearer token override
    #[must_use]
    pub fn with_auth_token(mut self, token: String) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ChatRelayConfig) {
        if self.upstream_url.is_some()
            || self.bind_addr.is_some()
            || self.history_dir.is_some()
            || self.fallback_grace_ms.is_some()
            || self.auth_token.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.upstream_url {
            config.upstream.base_url.clone_from(url);
        }

        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }

        if self.history_dir.is_some() {
            config.history_dir.clone_from(&self.history_dir);
        }

        if let Some(ms) = self.fallback_grace_ms {
            config.turn.fallback_grace = Duration::from_millis(ms);
        }

        if self.auth_token.is_some() {
            config.upstream.auth_token.clone_from(&self.auth_token);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
