//! Helper command-line protocol.
//!
//! Every invocation is `<interpreter> <script> <library> <token> [args...]`.

use super::error::HelperError;

/// Argument that switches the helper into streaming mode.
pub const LOOP_TOKEN: &str = "loop";

/// One-shot commands understood by the helper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HelperCommand {
  Play,
  Pause,
  TogglePlayPause,
  NextTrack,
  PreviousTrack,
  Stop,
  /// Seek to an absolute position in seconds.
  SetTime(f64),
  /// Check that the adapter library can be loaded.
  Test,
}

impl HelperCommand {
  /// Command token as passed on the command line.
  pub const fn token(&self) -> &'static str {
    match self {
      Self::Play => "play",
      Self::Pause => "pause",
      Self::TogglePlayPause => "toggle_play_pause",
      Self::NextTrack => "next_track",
      Self::PreviousTrack => "previous_track",
      Self::Stop => "stop",
      Self::SetTime(_) => "set_time",
      Self::Test => "test",
    }
  }

  /// Command arguments following the library path.
  pub fn to_args(&self) -> Result<Vec<String>, HelperError> {
    let mut args = vec![self.token().to_string()];
    if let Self::SetTime(seconds) = self {
      args.push(format_seconds(*seconds)?);
    }
    Ok(args)
  }
}

/// Format seconds as a plain decimal number.
///
/// Negative positions are rejected along with NaN and infinities.
///
/// `f64`'s `Display` never consults the locale and never uses exponent
/// notation, so the helper always sees `.` as the decimal separator.
pub fn format_seconds(seconds: f64) -> Result<String, HelperError> {
  if !seconds.is_finite() || seconds < 0.0 {
    return Err(HelperError::InvalidArgument(format!(
      "time must be a finite, non-negative number of seconds, got {}",
      seconds
    )));
  }
  Ok(format!("{}", seconds))
}
