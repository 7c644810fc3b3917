//! Long-running listener session.
//!
//! A session owns at most one helper running in `loop` mode. Three tasks
//! serve a running helper:
//! - the stream consumer reads stdout and queues chunks,
//! - the stderr forwarder copies helper diagnostics into the log,
//! - the supervisor owns the `Child`, delivers termination requests and
//!   reaps the process.
//!
//! Callbacks are invoked from a single dispatcher on the blocking pool, so the
//! data and termination handlers never run concurrently with each other and a
//! slow handler never stalls the runtime's workers.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::HelperError;
use super::locate::HelperLocator;
use super::process::{exit_signal, listener_command};
use super::stream::{ChunkSink, StreamConsumer, StreamEnd};
use crate::config::BridgeConfig;

/// How long the stdout reader may keep draining after the helper exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Called with every chunk of helper output.
pub type DataHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Called once when the helper of a session exits.
pub type TerminationHandler = Arc<dyn Fn(TerminationEvent) + Send + Sync>;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
  Idle,
  Running,
}

/// Outcome of a successful `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStart {
  /// A new helper was spawned.
  Started { pid: Option<u32> },
  /// A helper was already running; nothing changed.
  AlreadyRunning,
}

/// How the listener helper ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationEvent {
  /// Exit code, if the helper exited normally.
  pub exit_code: Option<i32>,
  /// Signal that killed the helper (Unix only).
  pub signal: Option<i32>,
  /// Whether `stop()` asked for the termination.
  pub requested: bool,
}

impl TerminationEvent {
  fn from_status(status: &io::Result<ExitStatus>, requested: bool) -> Self {
    match status {
      Ok(status) => Self {
        exit_code: status.code(),
        signal: exit_signal(status),
        requested,
      },
      Err(_) => Self {
        exit_code: None,
        signal: None,
        requested,
      },
    }
  }
}

/// Tunables for a listener session.
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
  pub read_buffer_size: usize,
  pub shutdown_grace: Duration,
}

impl Default for ListenerOptions {
  fn default() -> Self {
    Self::from(&BridgeConfig::default())
  }
}

impl From<&BridgeConfig> for ListenerOptions {
  fn from(config: &BridgeConfig) -> Self {
    Self {
      read_buffer_size: config.read_buffer_size,
      shutdown_grace: config.shutdown_grace(),
    }
  }
}

/// Handle to the running helper. Absent means Idle.
struct ActiveListener {
  generation: u64,
  pid: Option<u32>,
  cancel: CancellationToken,
}

struct SessionCore {
  active: Option<ActiveListener>,
  /// Generation of the most recently started helper.
  generation: u64,
  /// `stop()` was called for `generation`.
  stopped: bool,
}

enum SessionEvent {
  Chunk { generation: u64, data: Vec<u8> },
  Terminated { generation: u64, event: TerminationEvent },
}

struct Shared {
  core: Mutex<SessionCore>,
  on_data: RwLock<Option<DataHandler>>,
  on_terminated: RwLock<Option<TerminationHandler>>,
  events_tx: Sender<SessionEvent>,
}

impl Shared {
  /// Chunks of `generation` are wanted until it is stopped or superseded.
  fn accepts(&self, generation: u64) -> bool {
    let core = self.core.lock();
    core.generation == generation && !core.stopped
  }

  /// Termination of `generation` is wanted until a newer `start()` supersedes it.
  fn is_current(&self, generation: u64) -> bool {
    self.core.lock().generation == generation
  }

  /// Record the exit of `generation` and queue its termination notification.
  fn finish(&self, generation: u64, event: TerminationEvent) {
    let superseded = {
      let mut core = self.core.lock();
      if core.active.as_ref().is_some_and(|a| a.generation == generation) {
        core.active = None;
      }
      core.generation != generation
    };

    if superseded {
      log::debug!("Listener generation {} exited after being superseded", generation);
      return;
    }
    let _ = self
      .events_tx
      .try_send(SessionEvent::Terminated { generation, event });
  }
}

impl ChunkSink for Shared {
  fn forward(&self, generation: u64, chunk: Vec<u8>) -> bool {
    if !self.accepts(generation) {
      return false;
    }
    self
      .events_tx
      .try_send(SessionEvent::Chunk {
        generation,
        data: chunk,
      })
      .is_ok()
  }
}

/// Supervises the streaming helper process.
pub struct ListenerSession {
  shared: Arc<Shared>,
  locator: Arc<dyn HelperLocator>,
  options: ListenerOptions,
  runtime: Handle,
}

impl ListenerSession {
  /// Create an idle session whose tasks run on `runtime`.
  pub fn new(locator: Arc<dyn HelperLocator>, options: ListenerOptions, runtime: Handle) -> Self {
    // Unbounded; a slow handler lets this queue grow without limit
    let (events_tx, events_rx) = async_channel::unbounded();
    let shared = Arc::new(Shared {
      core: Mutex::new(SessionCore {
        active: None,
        generation: 0,
        stopped: false,
      }),
      on_data: RwLock::new(None),
      on_terminated: RwLock::new(None),
      events_tx,
    });

    let weak = Arc::downgrade(&shared);
    runtime.spawn_blocking(move || dispatch_loop(events_rx, weak));

    Self {
      shared,
      locator,
      options,
      runtime,
    }
  }

  /// Register the handler for helper output chunks.
  pub fn on_data<F>(&self, handler: F)
  where
    F: Fn(&[u8]) + Send + Sync + 'static,
  {
    *self.shared.on_data.write() = Some(Arc::new(handler));
  }

  /// Register the handler for helper termination.
  pub fn on_terminated<F>(&self, handler: F)
  where
    F: Fn(TerminationEvent) + Send + Sync + 'static,
  {
    *self.shared.on_terminated.write() = Some(Arc::new(handler));
  }

  pub fn state(&self) -> SessionState {
    if self.shared.core.lock().active.is_some() {
      SessionState::Running
    } else {
      SessionState::Idle
    }
  }

  pub fn is_running(&self) -> bool {
    self.state() == SessionState::Running
  }

  /// Spawn the helper in streaming mode unless one is already running.
  pub fn start(&self) -> Result<ListenerStart, HelperError> {
    // Held across the spawn so concurrent starts cannot both spawn
    let mut core = self.shared.core.lock();
    if let Some(active) = &core.active {
      log::debug!("Listener already running (pid: {:?})", active.pid);
      return Ok(ListenerStart::AlreadyRunning);
    }

    let paths = self.locator.locate().inspect_err(|e| {
      log::error!("Cannot start listener: {}", e);
    })?;

    let _guard = self.runtime.enter();
    let mut child = listener_command(&paths).spawn().inspect_err(|e| {
      log::error!("Failed to spawn listener {:?}: {}", paths.interpreter, e);
    })?;
    let stdout = child.stdout.take().ok_or(HelperError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take();

    core.generation += 1;
    core.stopped = false;
    let generation = core.generation;
    let pid = child.id();
    let cancel = CancellationToken::new();
    core.active = Some(ActiveListener {
      generation,
      pid,
      cancel: cancel.clone(),
    });

    let consumer = StreamConsumer::new(
      Arc::downgrade(&self.shared),
      generation,
      self.options.read_buffer_size,
    );
    let reader = self.runtime.spawn(consumer.run(stdout));
    let stderr_task = stderr.map(|stderr| self.runtime.spawn(forward_stderr(stderr)));
    self.runtime.spawn(supervise(Supervisor {
      shared: self.shared.clone(),
      child,
      generation,
      cancel,
      reader,
      stderr_task,
      shutdown_grace: self.options.shutdown_grace,
    }));

    log::info!("Listener started (pid: {:?}, generation {})", pid, generation);
    Ok(ListenerStart::Started { pid })
  }

  /// Ask the running helper to terminate. Returns `false` when Idle.
  ///
  /// The session is Idle as soon as this returns; the helper exits (and the
  /// termination handler runs) later.
  pub fn stop(&self) -> bool {
    let mut core = self.shared.core.lock();
    match core.active.take() {
      Some(active) => {
        core.stopped = true;
        active.cancel.cancel();
        log::info!("Listener stop requested (pid: {:?})", active.pid);
        true
      }
      None => {
        log::debug!("stop() called with no listener running");
        false
      }
    }
  }
}

impl Drop for ListenerSession {
  fn drop(&mut self) {
    self.stop();
  }
}

struct Supervisor {
  shared: Arc<Shared>,
  child: Child,
  generation: u64,
  cancel: CancellationToken,
  reader: JoinHandle<StreamEnd>,
  stderr_task: Option<JoinHandle<()>>,
  shutdown_grace: Duration,
}

async fn supervise(mut sup: Supervisor) {
  let pid = sup.child.id();

  let status = tokio::select! {
    status = sup.child.wait() => status,
    _ = sup.cancel.cancelled() => terminate(&mut sup.child, sup.shutdown_grace).await,
  };
  match &status {
    Ok(status) => log::info!("Listener exited with {} (pid: {:?})", status, pid),
    Err(e) => log::error!("Failed waiting for listener (pid: {:?}): {}", pid, e),
  }

  // Let the reader pick up what the helper wrote before exiting
  match tokio::time::timeout(DRAIN_GRACE, &mut sup.reader).await {
    Ok(Ok(end)) => log::debug!("Listener reader finished: {:?}", end),
    Ok(Err(e)) => log::error!("Listener reader task failed: {}", e),
    Err(_) => {
      log::warn!("Listener output still open after exit, detaching reader");
      sup.reader.abort();
      // Only a surviving member of the helper's group can hold the pipe open
      #[cfg(unix)]
      {
        if let Some(pid) = pid {
          super::process::kill_group(pid);
        }
      }
    }
  }
  if let Some(task) = sup.stderr_task {
    task.abort();
  }

  let event = TerminationEvent::from_status(&status, sup.cancel.is_cancelled());
  sup.shared.finish(sup.generation, event);
}

/// Graceful termination with a forced kill once `grace` runs out.
async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
  let Some(pid) = child.id() else {
    // Already reaped
    return child.wait().await;
  };

  #[cfg(unix)]
  let requested = super::process::request_termination(pid);
  #[cfg(not(unix))]
  let requested = child.start_kill();
  if let Err(e) = requested {
    log::error!("Failed to signal listener (pid: {}): {}", pid, e);
  }

  match tokio::time::timeout(grace, child.wait()).await {
    Ok(status) => status,
    Err(_) => {
      log::warn!("Listener ignored termination for {:?}, killing pid {}", grace, pid);
      #[cfg(unix)]
      super::process::kill_group(pid);
      if let Err(e) = child.kill().await {
        log::error!("kill() failed for listener (pid: {}): {}", pid, e);
      }
      child.wait().await
    }
  }
}

async fn forward_stderr(stderr: ChildStderr) {
  let mut lines = BufReader::new(stderr).lines();
  loop {
    match lines.next_line().await {
      Ok(Some(line)) => {
        let line = line.trim();
        if !line.is_empty() {
          log::warn!("Listener stderr: {}", line);
        }
      }
      Ok(None) => break,
      Err(e) => {
        log::debug!("Listener stderr read error: {}", e);
        break;
      }
    }
  }
}

/// Runs until every sender is gone, i.e. the session and its supervisors
/// have been dropped.
fn dispatch_loop(events_rx: Receiver<SessionEvent>, shared: std::sync::Weak<Shared>) {
  while let Ok(event) = events_rx.recv_blocking() {
    let Some(shared) = shared.upgrade() else {
      break;
    };
    match event {
      SessionEvent::Chunk { generation, data } => {
        // Re-checked here: stop() may have landed while the chunk was queued
        if !shared.accepts(generation) {
          continue;
        }
        let handler = shared.on_data.read().clone();
        if let Some(handler) = handler {
          handler(&data);
        }
      }
      SessionEvent::Terminated { generation, event } => {
        // A start() may have superseded this generation while the event was queued
        if !shared.is_current(generation) {
          log::debug!("Dropping termination of superseded generation {}", generation);
          continue;
        }
        let handler = shared.on_terminated.read().clone();
        if let Some(handler) = handler {
          handler(event);
        }
      }
    }
  }
  log::debug!("Listener dispatcher finished");
}
