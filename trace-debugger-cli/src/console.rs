//! Terminal front end of a debugging session
//!
//! Prints what the recorder reports, either as readable lines or as one JSON
//! object per line, and owns the breakpoints the user sets.

use crate::config::OutputFormat;
use chrono::Local;
use parking_lot::Mutex;
use serde_json::json;
use trace_debugger::{
    BreakpointSet, ConnectionOutcome, DebuggerError, DebuggerListener, Event, RecorderStatus, ReconstructedInput,
};

pub struct ConsoleListener {
    format: OutputFormat,
    breakpoints: Mutex<BreakpointSet>,
    /// Print every received event, not only breaks
    trace_events: bool,
}

impl ConsoleListener {
    pub fn new(format: OutputFormat, breakpoints: BreakpointSet) -> Self {
        Self {
            format,
            breakpoints: Mutex::new(breakpoints),
            trace_events: false,
        }
    }

    /// Builder method: echo each received event
    pub fn with_event_trace(mut self, enabled: bool) -> Self {
        self.trace_events = enabled;
        self
    }

    pub fn add_line(&self, line: u32) {
        self.breakpoints.lock().add_line(line);
    }

    pub fn add_token(&self, index: i64) {
        self.breakpoints.lock().add_token(index);
    }

    pub fn clear(&self) {
        self.breakpoints.lock().clear();
    }

    /// Print one message in the configured format
    pub fn emit(&self, kind: &str, text: &str, payload: serde_json::Value) {
        match self.format {
            OutputFormat::Text => println!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), text),
            OutputFormat::Json => {
                let line = json!({
                    "time": Local::now().to_rfc3339(),
                    "type": kind,
                    "data": payload,
                });
                println!("{}", line);
            }
        }
    }
}

impl DebuggerListener for ConsoleListener {
    fn breakpoints(&self) -> BreakpointSet {
        self.breakpoints.lock().clone()
    }

    fn on_event_appended(&self, event: &Event, position: usize) {
        if self.trace_events {
            self.emit("event", &format!("#{:<5} {}", position, event), json!({ "position": position, "event": event }));
        }
    }

    fn on_break(&self, event: &Event, position: usize) {
        self.emit("break", &format!("Break at #{}: {}", position, event), json!({ "position": position, "event": event }));
    }

    fn on_connecting(&self) {
        self.emit("connecting", "Waiting for the traced parser...", json!(null));
    }

    fn on_connection_result(&self, outcome: ConnectionOutcome) {
        self.emit("connection", &format!("Connection {}", outcome), json!(outcome.to_string()));
    }

    fn on_reconstructed_input(&self, input: &ReconstructedInput) {
        if self.format == OutputFormat::Json {
            self.emit("input", "", json!(input));
        }
    }

    fn on_status_changed(&self, status: RecorderStatus) {
        log::debug!("Status: {}", status);
    }

    fn on_stopped(&self) {
        self.emit("stopped", "Session stopped", json!(null));
    }

    fn on_error(&self, error: &DebuggerError) {
        log::error!("{}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoints_follow_commands() {
        let listener = ConsoleListener::new(OutputFormat::Text, BreakpointSet::new().with_line(4));
        listener.add_token(11);
        let set = listener.breakpoints();
        assert!(set.has_line(4));
        assert!(set.has_token(11));

        listener.clear();
        assert!(listener.breakpoints().is_empty());
    }
}
