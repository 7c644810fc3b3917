//! Bridge between a host application and the external media-control helper.
//!
//! One-shot commands (play, pause, seek...) run the helper to completion on a
//! worker thread. The listener keeps a helper running in streaming mode and
//! hands every chunk of its output to a registered callback.

mod config;
mod controller;
pub mod helper;

pub use config::{
  BridgeConfig, ConfigError, INTERPRETER_ENV_VAR, LIBRARY_ENV_VAR, SCRIPT_ENV_VAR,
};
pub use controller::{MediaController, PendingCommand};
pub use helper::{
  CommandResult, HelperCommand, HelperError, HelperLocator, HelperPaths, ListenerStart,
  SessionState, TerminationEvent,
};
