//! Helper process spawning and signalling.

use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

use super::locate::HelperPaths;
use super::protocol::LOOP_TOKEN;

/// Full argv after the interpreter: `[script, library] + args`.
pub fn helper_argv(paths: &HelperPaths, args: &[String]) -> Vec<OsString> {
  let mut argv = Vec::with_capacity(args.len() + 2);
  argv.push(paths.script.clone().into_os_string());
  argv.push(paths.library.clone().into_os_string());
  argv.extend(args.iter().map(OsString::from));
  argv
}

/// Command for a one-shot invocation with both output pipes captured.
pub fn oneshot_command(paths: &HelperPaths, args: &[String]) -> Command {
  let mut cmd = Command::new(&paths.interpreter);
  cmd
    .args(helper_argv(paths, args))
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  // Own process group so a timeout can take down anything the helper forked
  #[cfg(unix)]
  cmd.process_group(0);

  cmd
}

/// Async command for the streaming listener.
pub fn listener_command(paths: &HelperPaths) -> Command {
  let mut cmd = Command::new(&paths.interpreter);
  cmd
    .args(helper_argv(paths, &[LOOP_TOKEN.to_string()]))
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  #[cfg(unix)]
  cmd.process_group(0);

  cmd
}

/// Ask the helper (and its process group) to shut down gracefully.
#[cfg(unix)]
pub fn request_termination(pid: u32) -> std::io::Result<()> {
  use nix::sys::signal::{killpg, Signal};
  use nix::unistd::Pid;

  match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
    Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
    Err(e) => Err(std::io::Error::from(e)),
  }
}

/// Kill whatever is left of the helper's process group.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
  use nix::sys::signal::{killpg, Signal};
  use nix::unistd::Pid;

  let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

/// Exit code as reported to callers; a signal death reports the signal number.
pub fn exit_code(status: &ExitStatus) -> i32 {
  if let Some(code) = status.code() {
    return code;
  }
  exit_signal(status).unwrap_or(-1)
}

/// Signal that terminated the process, if any.
pub fn exit_signal(status: &ExitStatus) -> Option<i32> {
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
  }
  #[cfg(not(unix))]
  {
    let _ = status;
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  fn paths() -> HelperPaths {
    HelperPaths {
      interpreter: PathBuf::from("/usr/bin/perl"),
      script: PathBuf::from("/opt/adapter/run.pl"),
      library: PathBuf::from("/opt/adapter/MediaRemoteAdapter"),
    }
  }

  #[test]
  fn test_argv_prefixes_script_and_library() {
    let argv = helper_argv(&paths(), &["set_time".to_string(), "12.5".to_string()]);
    assert_eq!(
      argv,
      vec![
        OsString::from("/opt/adapter/run.pl"),
        OsString::from("/opt/adapter/MediaRemoteAdapter"),
        OsString::from("set_time"),
        OsString::from("12.5"),
      ]
    );
  }

  #[test]
  fn test_listener_command_uses_loop_token() {
    let cmd = listener_command(&paths());
    let std_cmd = cmd.as_std();
    assert_eq!(std_cmd.get_program(), "/usr/bin/perl");
    let args: Vec<_> = std_cmd.get_args().collect();
    assert_eq!(args.last().copied(), Some(std::ffi::OsStr::new("loop")));
    assert_eq!(args.len(), 3);
  }

  #[test]
  fn test_oneshot_command_appends_arguments() {
    let cmd = oneshot_command(&paths(), &["next_track".to_string()]);
    let args: Vec<_> = cmd.as_std().get_args().collect();
    assert_eq!(args.len(), 3);
    assert_eq!(args[2], "next_track");
  }

  #[cfg(unix)]
  #[test]
  fn test_exit_code_reports_signal_number() {
    use std::process::Command;

    let status = Command::new("/bin/sh")
      .args(["-c", "kill -TERM $$"])
      .status()
      .unwrap();
    assert_eq!(exit_signal(&status), Some(15));
    assert_eq!(exit_code(&status), 15);

    let status = Command::new("/bin/sh").args(["-c", "exit 3"]).status().unwrap();
    assert_eq!(exit_code(&status), 3);
    assert_eq!(exit_signal(&status), None);
  }
}
