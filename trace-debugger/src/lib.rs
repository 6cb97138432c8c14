//! Trace Debugger Library
//!
//! An engine for debugging a parser by its execution trace. A traced parser
//! streams what it does (rule entries, decisions, lookahead peeks, consumed
//! tokens, backtracking, error recovery, tree construction) over TCP; this
//! library records that stream and lets a consumer step through it in both
//! directions.
//!
//! # Architecture
//!
//! - [`protocol`] decodes the line protocol of the traced process
//! - [`EventLog`] keeps every event together with a cursor
//! - [`StepEngine`] moves the cursor and decides where to break
//! - [`LookaheadReconstructor`] rebuilds the input the parser saw, including
//!   tokens it only peeked at
//! - [`Replayer`] rebuilds rule stack, parse tree and AST for the cursor
//! - [`Recorder`] ties it together for a live session: connection retry,
//!   the receiver thread and pausing the traced process on a break
//!
//! The library does NOT parse grammars or run parsers itself, and it keeps
//! nothing across process restarts. Presentation is left to the consumer, which
//! plugs in through [`DebuggerListener`].
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use trace_debugger::{BreakKind, DebuggerConfig, EventKind, NullListener, Recorder};
//!
//! let recorder = Recorder::new(DebuggerConfig::new(), Arc::new(NullListener));
//! recorder.connect("localhost", None).unwrap();
//!
//! // Later, once the session paused on commence
//! recorder.step_forward(BreakKind::Event(EventKind::ConsumeToken));
//! recorder.with_replay(|replay| println!("{}", replay.input().visible_text()));
//! recorder.stop();
//! ```

// Public modules
pub mod config;
pub mod connection;
pub mod event_log;
pub mod lookahead;
pub mod protocol;
pub mod recorder;
pub mod replay;
pub mod step;
pub mod tree;
pub mod types;

// Re-export main types for convenience
pub use config::{DebuggerConfig, DEFAULT_PORT};
pub use connection::{CancelToken, ConnectionOutcome, Connector, TcpConnector};
pub use event_log::EventLog;
pub use lookahead::{LookaheadReconstructor, ReconstructedInput, TokenState};
pub use protocol::{EventSource, EventStream, SessionInfo};
pub use recorder::{DebuggerListener, NullListener, Recorder};
pub use replay::Replayer;
pub use step::{BreakKind, BreakpointSet, Direction, RecorderStatus, StepEngine, StepOutcome};
pub use types::{DebuggerError, Event, EventKind, ExceptionInfo, NodeId, NodeSource, Result, Token};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: a fresh recorder is idle
        let recorder = Recorder::new(DebuggerConfig::new(), std::sync::Arc::new(NullListener));
        assert_eq!(recorder.status(), RecorderStatus::Stopped);
        assert_eq!(recorder.event_count(), 0);
        assert!(recorder.current_event().is_none());
    }
}
