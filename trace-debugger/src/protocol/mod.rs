//! Wire protocol of the traced process
//!
//! The traced parser streams its execution as text lines over a TCP connection.
//! This module contains the line codec and the stream wrapper that performs the
//! handshake and acknowledges events.

use crate::types::{Event, Result};
use serde::{Deserialize, Serialize};

pub mod codec;
pub mod stream;

pub use codec::{decode_event, encode_event};
pub use stream::{EventStream, ShutdownHandle};

/// Details the traced process announces during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Version of the debug protocol spoken by the traced process
    pub protocol_version: String,
    /// Grammar file the traced parser was generated from
    pub grammar_file: String,
}

/// A source of events from a traced process
///
/// The receiver loop only needs these three operations, so anything that can
/// produce events in execution order can feed a recorder.
pub trait EventSource: Send {
    /// Read the greeting of the traced process
    fn handshake(&mut self) -> Result<SessionInfo>;

    /// Next event in execution order, `None` once the stream ended
    fn next_event(&mut self) -> Result<Option<Event>>;

    /// Release the traced process after the last returned event
    fn ack(&mut self) -> Result<()>;
}
