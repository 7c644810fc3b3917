//! Helper bridge - spawns and supervises the external media-control helper.
//!
//! Architecture:
//! - `locate.rs` - Interpreter, script and library resolution
//! - `protocol.rs` - Command tokens and argument formatting
//! - `process.rs` - Command construction and process signalling
//! - `invocation.rs` - Blocking one-shot command round-trips
//! - `stream.rs` - Chunked reader for the listener's stdout
//! - `session.rs` - Listener lifecycle, termination and callback dispatch

mod error;
mod invocation;
mod locate;
mod process;
mod protocol;
mod session;
mod stream;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use error::HelperError;
pub use invocation::{CommandResult, HelperInvocation, HelperRunner};
pub use locate::{find_interpreter, ConfigLocator, HelperLocator, HelperPaths};
pub use protocol::{format_seconds, HelperCommand, LOOP_TOKEN};
pub use session::{
  ListenerOptions, ListenerSession, ListenerStart, SessionState, TerminationEvent,
};
pub use stream::{ChunkSink, StreamConsumer, StreamEnd};
