//! Stub helpers for tests.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::runtime::Handle;

use super::invocation::HelperRunner;
use super::locate::HelperPaths;

/// A shell script standing in for the real helper, run by `/bin/sh`.
///
/// The script sees the usual argv: `$0` is the script, `$1` the library
/// (the stub's temp dir) and `$2...` the command arguments.
pub struct StubHelper {
  _dir: TempDir,
  paths: HelperPaths,
}

impl StubHelper {
  pub fn new(body: &str) -> Self {
    let dir = tempfile::tempdir().expect("create stub dir");
    let script = dir.path().join("run.sh");
    std::fs::write(&script, body).expect("write stub script");
    let paths = HelperPaths {
      interpreter: PathBuf::from("/bin/sh"),
      script,
      library: dir.path().to_path_buf(),
    };
    Self { _dir: dir, paths }
  }

  pub fn paths(&self) -> &HelperPaths {
    &self.paths
  }

  pub fn runner(&self, runtime: &Handle) -> HelperRunner {
    HelperRunner::new(Arc::new(self.paths.clone()), runtime.clone())
  }
}
