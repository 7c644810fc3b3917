//! Helper interpreter, script and library resolution.

use std::path::PathBuf;

use super::error::HelperError;
use crate::config::BridgeConfig;

/// Fully resolved locations needed to launch the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperPaths {
  pub interpreter: PathBuf,
  pub script: PathBuf,
  pub library: PathBuf,
}

/// Resolves the helper locations. Called before every spawn.
pub trait HelperLocator: Send + Sync {
  fn locate(&self) -> Result<HelperPaths, HelperError>;
}

/// Fixed, pre-resolved paths. Nothing is checked on disk.
impl HelperLocator for HelperPaths {
  fn locate(&self) -> Result<HelperPaths, HelperError> {
    Ok(self.clone())
  }
}

/// Locator driven by [`BridgeConfig`].
#[derive(Debug, Clone)]
pub struct ConfigLocator {
  interpreter: Option<PathBuf>,
  script: Option<PathBuf>,
  library: Option<PathBuf>,
}

impl ConfigLocator {
  pub fn new(config: &BridgeConfig) -> Self {
    let to_path = |value: &Option<String>| {
      value
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
    };
    Self {
      interpreter: to_path(&config.interpreter),
      script: to_path(&config.script_path),
      library: to_path(&config.library_path),
    }
  }
}

impl HelperLocator for ConfigLocator {
  fn locate(&self) -> Result<HelperPaths, HelperError> {
    let script = self.script.clone().ok_or(HelperError::MissingPath("Helper script"))?;
    if !script.is_file() {
      return Err(HelperError::ScriptNotFound(script));
    }

    let library = self.library.clone().ok_or(HelperError::MissingPath("Adapter library"))?;
    if !library.exists() {
      return Err(HelperError::LibraryNotFound(library));
    }

    let interpreter = match &self.interpreter {
      Some(path) if path.exists() => path.clone(),
      Some(path) => which::which(path).map_err(|_| HelperError::InterpreterNotFound)?,
      None => find_interpreter().ok_or(HelperError::InterpreterNotFound)?,
    };

    Ok(HelperPaths {
      interpreter,
      script,
      library,
    })
  }
}

/// Find the perl interpreter the helper script is written for.
pub fn find_interpreter() -> Option<PathBuf> {
  // System perl first, then PATH
  let system = PathBuf::from("/usr/bin/perl");
  if system.exists() {
    return Some(system);
  }

  which::which("perl").ok()
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;

  fn config_for(script: &std::path::Path, library: &std::path::Path) -> BridgeConfig {
    let mut config = BridgeConfig::new(
      script.to_string_lossy().into_owned(),
      library.to_string_lossy().into_owned(),
    );
    config.interpreter = Some("/bin/sh".to_string());
    config
  }

  #[test]
  fn test_locate_existing_paths() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("run.pl");
    std::fs::write(&script, "").unwrap();

    let paths = ConfigLocator::new(&config_for(&script, dir.path()))
      .locate()
      .unwrap();
    assert_eq!(paths.script, script);
    assert_eq!(paths.library, dir.path());
    assert_eq!(paths.interpreter, PathBuf::from("/bin/sh"));
  }

  #[test]
  fn test_missing_script_fails() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("missing.pl");

    match ConfigLocator::new(&config_for(&script, dir.path())).locate() {
      Err(HelperError::ScriptNotFound(path)) => assert_eq!(path, script),
      other => panic!("Expected ScriptNotFound, got {:?}", other),
    }
  }

  #[test]
  fn test_unconfigured_library_fails() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("run.pl");
    std::fs::write(&script, "").unwrap();

    let mut config = config_for(&script, dir.path());
    config.library_path = None;
    assert!(matches!(
      ConfigLocator::new(&config).locate(),
      Err(HelperError::MissingPath(_))
    ));
  }

  #[test]
  fn test_unknown_interpreter_fails() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("run.pl");
    std::fs::write(&script, "").unwrap();

    let mut config = config_for(&script, dir.path());
    config.interpreter = Some("definitely-not-an-interpreter-xyz".to_string());
    assert!(matches!(
      ConfigLocator::new(&config).locate(),
      Err(HelperError::InterpreterNotFound)
    ));
  }
}
