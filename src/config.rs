//! Bridge configuration with persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the interpreter path.
pub const INTERPRETER_ENV_VAR: &str = "MEDIAREMOTE_BRIDGE_INTERPRETER";
/// Environment variable overriding the helper script path.
pub const SCRIPT_ENV_VAR: &str = "MEDIAREMOTE_BRIDGE_SCRIPT";
/// Environment variable overriding the adapter library path.
pub const LIBRARY_ENV_VAR: &str = "MEDIAREMOTE_BRIDGE_LIBRARY";

const CONFIG_DIR_NAME: &str = "mediaremote-bridge";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config {path:?}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Failed to parse config {path:?}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
  /// Interpreter running the helper script (None = auto-detect perl).
  #[serde(default)]
  pub interpreter: Option<String>,

  /// Helper script handed to the interpreter.
  #[serde(default)]
  pub script_path: Option<String>,

  /// Adapter library identifier passed as the first script argument.
  #[serde(default)]
  pub library_path: Option<String>,

  /// Timeout for one-shot commands in milliseconds (None = wait for exit).
  #[serde(default)]
  pub command_timeout_ms: Option<u64>,

  /// How long a stopped listener may take to exit before it is killed.
  #[serde(default = "default_shutdown_grace_ms")]
  pub shutdown_grace_ms: u64,

  /// Capacity of the listener read buffer (upper bound of one chunk).
  #[serde(default = "default_read_buffer_size")]
  pub read_buffer_size: usize,
}

fn default_shutdown_grace_ms() -> u64 {
  5000
}

fn default_read_buffer_size() -> usize {
  64 * 1024
}

impl Default for BridgeConfig {
  fn default() -> Self {
    Self {
      interpreter: None,
      script_path: None,
      library_path: None,
      command_timeout_ms: None,
      shutdown_grace_ms: default_shutdown_grace_ms(),
      read_buffer_size: default_read_buffer_size(),
    }
  }
}

impl BridgeConfig {
  /// Configuration pointing at an explicit script and library.
  pub fn new(script_path: impl Into<String>, library_path: impl Into<String>) -> Self {
    Self {
      script_path: Some(script_path.into()),
      library_path: Some(library_path.into()),
      ..Self::default()
    }
  }

  /// Default location of the config file, if the platform has a config dir.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
  }

  /// Load and validate a JSON config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate()?;
    log::info!("Loaded bridge config from {:?}", path);
    Ok(config)
  }

  /// Load the config from `default_path()`, falling back to defaults when absent.
  pub fn load_or_default() -> Result<Self, ConfigError> {
    Self::load_optional(Self::default_path())
  }

  fn load_optional(path: Option<PathBuf>) -> Result<Self, ConfigError> {
    match path {
      Some(path) if path.exists() => Self::load(&path),
      _ => {
        log::debug!("No bridge config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  /// Apply `MEDIAREMOTE_BRIDGE_*` environment overrides.
  pub fn with_env_overrides(self) -> Self {
    self.with_overrides(|name| std::env::var(name).ok())
  }

  fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    if let Some(value) = non_empty(INTERPRETER_ENV_VAR) {
      self.interpreter = Some(value);
    }
    if let Some(value) = non_empty(SCRIPT_ENV_VAR) {
      self.script_path = Some(value);
    }
    if let Some(value) = non_empty(LIBRARY_ENV_VAR) {
      self.library_path = Some(value);
    }
    self
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.read_buffer_size == 0 {
      return Err(ConfigError::Invalid(
        "Read buffer size must be greater than zero".to_string(),
      ));
    }
    if self.command_timeout_ms == Some(0) {
      return Err(ConfigError::Invalid(
        "Command timeout must be greater than zero when set".to_string(),
      ));
    }
    for (name, value) in [
      ("interpreter", &self.interpreter),
      ("scriptPath", &self.script_path),
      ("libraryPath", &self.library_path),
    ] {
      if matches!(value, Some(v) if v.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!("{} cannot be empty", name)));
      }
    }
    Ok(())
  }

  pub fn command_timeout(&self) -> Option<Duration> {
    self.command_timeout_ms.map(Duration::from_millis)
  }

  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_millis(self.shutdown_grace_ms)
  }
}
