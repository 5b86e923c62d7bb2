//! TOML Configuration File Support
//!
//! Centralized configuration loading for the overlay client and server,
//! from a TOML file at `~/.config/overlay/overlay.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The file lives at `$XDG_CONFIG_HOME/overlay/overlay.toml` (typically
//! `~/.config/overlay/overlay.toml`).
//!
//! # Example Configuration
//!
//! ```toml
//! [client]
//! min_close_duration_ms = 250
//! max_stack_depth = 8
//!
//! [server]
//! session_ttl_secs = 3600
//! max_session_entries = 10000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable for `client.min_close_duration_ms`
pub const ENV_MIN_CLOSE_MS: &str = "OVERLAY_MIN_CLOSE_MS";
/// Environment variable for `client.max_stack_depth`
pub const ENV_MAX_STACK_DEPTH: &str = "OVERLAY_MAX_STACK_DEPTH";
/// Environment variable for `server.session_ttl_secs`
pub const ENV_SESSION_TTL_SECS: &str = "OVERLAY_SESSION_TTL_SECS";
/// Environment variable for `server.max_session_entries`
pub const ENV_MAX_SESSION_ENTRIES: &str = "OVERLAY_MAX_SESSION_ENTRIES";

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
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Client section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Minimum time an overlay stays in `closing`, in milliseconds
    pub min_close_duration_ms: Option<u64>,

    /// Maximum number of stacked overlays
    pub max_stack_depth: Option<usize>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Lifetime of a session entry in seconds
    pub session_ttl_secs: Option<u64>,

    /// Maximum number of session entries kept
    pub max_session_entries: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayToml {
    /// Client configuration section
    pub client: ClientToml,

    /// Server configuration section
    pub server: ServerToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Settings of the client runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Minimum visible duration of a focused close
    pub min_close_duration: Duration,

    /// Maximum number of stacked overlays
    pub max_stack_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            min_close_duration: Duration::from_millis(250),
            max_stack_depth: 8,
        }
    }
}

/// Settings of the server side
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Lifetime of a session entry since its last write
    pub session_ttl: Duration,

    /// Maximum number of session entries; the oldest are evicted first
    pub max_session_entries: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600), // 1 hour
            max_session_entries: 10_000,
        }
    }
}

/// Centralized configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug, Default)]
pub struct OverlaySettings {
    /// Client runtime settings
    pub client: ClientConfig,

    /// Server settings
    pub server: ServerConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: Option<ConfigSource>,
}

impl OverlaySettings {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source.unwrap_or(ConfigSource::Default)
    }

    /// Check values that would make the runtime unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.max_stack_depth == 0 {
            return Err(ConfigError::ValidationError(
                "client.max_stack_depth must be at least 1".into(),
            ));
        }
        if self.server.max_session_entries == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_session_entries must be at least 1".into(),
            ));
        }
        if self.server.session_ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "server.session_ttl_secs must be at least 1".into(),
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
/// Returns `$XDG_CONFIG_HOME/overlay/overlay.toml` or
/// `~/.config/overlay/overlay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("overlay").join("overlay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<OverlaySettings, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only
///   defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<OverlaySettings, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment overrides through `env`
fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<OverlaySettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = OverlaySettings::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: OverlayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = Some(ConfigSource::File);

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
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut OverlaySettings, toml: &OverlayToml) {
    if let Some(ms) = toml.client.min_close_duration_ms {
        config.client.min_close_duration = Duration::from_millis(ms);
    }
    if let Some(depth) = toml.client.max_stack_depth {
        config.client.max_stack_depth = depth;
    }

    if let Some(secs) = toml.server.session_ttl_secs {
        config.server.session_ttl = Duration::from_secs(secs);
    }
    if let Some(entries) = toml.server.max_session_entries {
        config.server.max_session_entries = entries;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut OverlaySettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(ms) = env(ENV_MIN_CLOSE_MS).and_then(|v| v.parse::<u64>().ok()) {
        config.client.min_close_duration = Duration::from_millis(ms);
        config.source = Some(ConfigSource::Env);
    }
    if let Some(depth) = env(ENV_MAX_STACK_DEPTH).and_then(|v| v.parse::<usize>().ok()) {
        config.client.max_stack_depth = depth;
        config.source = Some(ConfigSource::Env);
    }
    if let Some(secs) = env(ENV_SESSION_TTL_SECS).and_then(|v| v.parse::<u64>().ok()) {
        config.server.session_ttl = Duration::from_secs(secs);
        config.source = Some(ConfigSource::Env);
    }
    if let Some(entries) = env(ENV_MAX_SESSION_ENTRIES).and_then(|v| v.parse::<usize>().ok()) {
        config.server.max_session_entries = entries;
        config.source = Some(ConfigSource::Env);
    }
}
