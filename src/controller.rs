//! High-level media controller with command methods.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::helper::{
  CommandResult, ConfigLocator, HelperCommand, HelperError, HelperLocator, HelperRunner,
  ListenerOptions, ListenerSession, ListenerStart, SessionState, TerminationEvent,
};

/// A command running on the blocking pool.
///
/// Dropping it leaves the command running (fire-and-forget); awaiting it
/// yields the helper's result.
pub struct PendingCommand {
  command: HelperCommand,
  handle: JoinHandle<CommandResult>,
}

impl PendingCommand {
  pub fn command(&self) -> HelperCommand {
    self.command
  }
}

impl Future for PendingCommand {
  type Output = CommandResult;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.handle).poll(cx).map(|joined| {
      joined.unwrap_or_else(|e| CommandResult::failure(format!("Command task failed: {}", e)))
    })
  }
}

/// Controls the media helper: one-shot commands plus the listener session.
pub struct MediaController {
  runtime: Handle,
  runner: HelperRunner,
  listener: ListenerSession,
}

impl MediaController {
  /// Create a controller bound to the current Tokio runtime.
  pub fn new(config: BridgeConfig) -> Result<Self, HelperError> {
    let runtime = Handle::try_current().map_err(|_| HelperError::NoRuntime)?;
    Ok(Self::with_runtime(config, runtime))
  }

  /// Create a controller whose work runs on `runtime`.
  /// Usable from threads that are not part of any runtime.
  pub fn with_runtime(config: BridgeConfig, runtime: Handle) -> Self {
    let locator = Arc::new(ConfigLocator::new(&config));
    Self::with_locator(locator, &config, runtime)
  }

  /// Create a controller with a custom helper locator.
  pub fn with_locator(
    locator: Arc<dyn HelperLocator>,
    config: &BridgeConfig,
    runtime: Handle,
  ) -> Self {
    let runner =
      HelperRunner::new(locator.clone(), runtime.clone()).with_timeout(config.command_timeout());
    let listener = ListenerSession::new(locator, ListenerOptions::from(config), runtime.clone());
    Self {
      runtime,
      runner,
      listener,
    }
  }

  /// Register the handler for track info chunks from the listener.
  pub fn on_track_info_received<F>(&self, handler: F)
  where
    F: Fn(&[u8]) + Send + Sync + 'static,
  {
    self.listener.on_data(handler);
  }

  /// Register the handler fired when the listener helper exits.
  pub fn on_listener_terminated<F>(&self, handler: F)
  where
    F: Fn(TerminationEvent) + Send + Sync + 'static,
  {
    self.listener.on_terminated(handler);
  }

  /// Start streaming track info. No-op if already listening.
  pub fn start_listening(&self) -> Result<ListenerStart, HelperError> {
    self.listener.start()
  }

  /// Stop streaming. Returns `false` if nothing was running.
  pub fn stop_listening(&self) -> bool {
    self.listener.stop()
  }

  pub fn is_listening(&self) -> bool {
    self.listener.state() == SessionState::Running
  }

  pub fn listener_state(&self) -> SessionState {
    self.listener.state()
  }

  /// Dispatch a command without blocking the caller.
  pub fn send(&self, command: HelperCommand) -> PendingCommand {
    let runner = self.runner.clone();
    let handle = self.runtime.spawn_blocking(move || {
      let result = runner.run(command);
      if result.is_success() {
        log::debug!("Helper command {} succeeded", command.token());
      } else {
        log::warn!(
          "Helper command {} failed ({}): {}",
          command.token(),
          result.exit_code,
          result.error.as_deref().unwrap_or("")
        );
      }
      result
    });
    PendingCommand { command, handle }
  }

  /// Run a command on the current thread and wait for its result.
  /// Blocks; do not call from an async context.
  pub fn invoke_blocking(&self, command: HelperCommand) -> CommandResult {
    self.runner.run(command)
  }

  pub fn play(&self) -> PendingCommand {
    self.send(HelperCommand::Play)
  }

  pub fn pause(&self) -> PendingCommand {
    self.send(HelperCommand::Pause)
  }

  pub fn toggle_play_pause(&self) -> PendingCommand {
    self.send(HelperCommand::TogglePlayPause)
  }

  pub fn next_track(&self) -> PendingCommand {
    self.send(HelperCommand::NextTrack)
  }

  pub fn previous_track(&self) -> PendingCommand {
    self.send(HelperCommand::PreviousTrack)
  }

  /// Stop playback (not the listener, see `stop_listening`).
  pub fn stop(&self) -> PendingCommand {
    self.send(HelperCommand::Stop)
  }

  /// Seek to an absolute position in seconds.
  ///
  /// Negative and non-finite values are rejected without running the helper;
  /// the result then carries exit code `-1` and an "Invalid argument" error.
  pub fn set_time(&self, seconds: f64) -> PendingCommand {
    self.send(HelperCommand::SetTime(seconds))
  }

  /// Check that the helper can load the adapter library.
  pub fn test(&self) -> PendingCommand {
    self.send(HelperCommand::Test)
  }
}
