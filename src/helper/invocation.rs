//! One-shot helper invocations.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;

use super::error::HelperError;
use super::locate::{HelperLocator, HelperPaths};
use super::process::{exit_code, oneshot_command};
use super::protocol::HelperCommand;

/// Outcome of a one-shot helper run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
  /// Trimmed stdout, `None` when it was not valid UTF-8 or never captured.
  pub output: Option<String>,
  /// Trimmed stderr, or the reason the helper could not be run.
  pub error: Option<String>,
  /// Helper exit code, `-1` when it could not be run to completion.
  pub exit_code: i32,
}

impl CommandResult {
  /// Result for a helper that was never run (or did not finish).
  pub fn failure(message: impl Into<String>) -> Self {
    Self {
      output: None,
      error: Some(message.into()),
      exit_code: -1,
    }
  }

  /// Check if the helper exited with 0.
  pub fn is_success(&self) -> bool {
    self.exit_code == 0
  }
}

impl From<HelperError> for CommandResult {
  fn from(err: HelperError) -> Self {
    Self::failure(err.to_string())
  }
}

/// Arguments for a single helper run, following the script and library paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperInvocation {
  args: Vec<String>,
}

impl HelperInvocation {
  pub fn new<I, S>(args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      args: args.into_iter().map(Into::into).collect(),
    }
  }

  pub fn from_command(command: HelperCommand) -> Result<Self, HelperError> {
    Ok(Self {
      args: command.to_args()?,
    })
  }

  pub fn args(&self) -> &[String] {
    &self.args
  }
}

/// Runs one-shot invocations to completion.
#[derive(Clone)]
pub struct HelperRunner {
  locator: Arc<dyn HelperLocator>,
  runtime: Handle,
  timeout: Option<Duration>,
}

impl HelperRunner {
  /// Runner whose helper processes are driven by `runtime`.
  pub fn new(locator: Arc<dyn HelperLocator>, runtime: Handle) -> Self {
    Self {
      locator,
      runtime,
      timeout: None,
    }
  }

  /// Kill helpers that run longer than `timeout`.
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  /// Spawn the helper, wait for it to exit and collect its output.
  ///
  /// Blocks the calling thread; call it from a blocking worker or a thread
  /// outside the runtime, never from async code. The helper is reaped before
  /// this returns, whatever the outcome.
  pub fn invoke(&self, invocation: &HelperInvocation) -> CommandResult {
    let paths = match self.locator.locate() {
      Ok(paths) => paths,
      Err(e) => {
        log::warn!("Cannot run helper {:?}: {}", invocation.args(), e);
        return e.into();
      }
    };

    log::debug!("Running helper: {:?}", invocation.args());
    self.runtime.block_on(self.execute(&paths, invocation.args()))
  }

  /// Shorthand for invoking a [`HelperCommand`].
  pub fn run(&self, command: HelperCommand) -> CommandResult {
    match HelperInvocation::from_command(command) {
      Ok(invocation) => self.invoke(&invocation),
      Err(e) => e.into(),
    }
  }

  async fn execute(&self, paths: &HelperPaths, args: &[String]) -> CommandResult {
    let mut child = match oneshot_command(paths, args).spawn() {
      Ok(child) => child,
      Err(e) => {
        log::error!("Failed to spawn helper {:?}: {}", paths.interpreter, e);
        return CommandResult::failure(e.to_string());
      }
    };
    let pid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let wait = async {
      let Some(timeout) = self.timeout else {
        return child.wait().await.map(Some);
      };
      match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.map(Some),
        Err(_) => {
          log::warn!("Helper exceeded {:?}, killing pid {:?}", timeout, pid);
          #[cfg(unix)]
          {
            if let Some(pid) = pid {
              super::process::kill_group(pid);
            }
          }
          // kill() also reaps
          child.kill().await.map(|()| None)
        }
      }
    };

    // Pipes are drained alongside the wait so a chatty helper cannot stall
    let (status, stdout, stderr) = tokio::join!(wait, read_pipe(stdout), read_pipe(stderr));

    match status {
      Ok(status) => Collected {
        stdout,
        stderr,
        status,
      }
      .into_result(self.timeout),
      Err(e) => {
        // Dropping the child sends SIGKILL; tokio reaps it in the background
        log::error!("Failed waiting for helper (pid: {:?}): {}", pid, e);
        CommandResult::failure(e.to_string())
      }
    }
  }
}

/// Raw output of a finished (or killed) helper. `status` is `None` on timeout.
struct Collected {
  stdout: Vec<u8>,
  stderr: Vec<u8>,
  status: Option<ExitStatus>,
}

impl Collected {
  fn into_result(self, timeout: Option<Duration>) -> CommandResult {
    let output = decode(self.stdout);
    let error = decode(self.stderr);
    match self.status {
      Some(status) => CommandResult {
        output,
        error,
        exit_code: exit_code(&status),
      },
      None => {
        let millis = timeout.map(|t| t.as_millis()).unwrap_or_default();
        let message = match error.filter(|e| !e.is_empty()) {
          Some(stderr) => format!("Helper timed out after {}ms: {}", millis, stderr),
          None => format!("Helper timed out after {}ms", millis),
        };
        CommandResult {
          output,
          error: Some(message),
          exit_code: -1,
        }
      }
    }
  }
}

fn decode(bytes: Vec<u8>) -> Option<String> {
  String::from_utf8(bytes).ok().map(|s| s.trim().to_string())
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
  let mut buf = Vec::new();
  if let Some(mut pipe) = pipe {
    if let Err(e) = pipe.read_to_end(&mut buf).await {
      log::debug!("Helper pipe read failed: {}", e);
    }
  }
  buf
}
