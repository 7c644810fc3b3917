//! Helper bridge error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when resolving, spawning or driving the helper.
#[derive(Debug, Error)]
pub enum HelperError {
  #[error("Helper interpreter not found")]
  InterpreterNotFound,

  #[error("Helper script not found: {0:?}")]
  ScriptNotFound(PathBuf),

  #[error("Adapter library not found: {0:?}")]
  LibraryNotFound(PathBuf),

  #[error("{0} path is not configured")]
  MissingPath(&'static str),

  #[error("Failed to spawn helper: {0}")]
  Spawn(#[from] std::io::Error),

  #[error("Helper {0} pipe was not captured")]
  MissingPipe(&'static str),

  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  #[error("No Tokio runtime available")]
  NoRuntime,
}
