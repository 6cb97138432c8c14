//! Stepping and breakpoint evaluation
//!
//! The step engine decides where the cursor of the event log stops. A step walks
//! the log in one direction and stops on the first event matching the active
//! break kind or one of the consumer's breakpoints. The engine also carries the
//! recorder status, since every break is a status transition.

use crate::event_log::EventLog;
use crate::types::{DebuggerError, Event, EventKind, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// What a step is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BreakKind {
    /// Never break
    #[default]
    None,
    /// Break on every event
    All,
    /// Break on events of one kind
    Event(EventKind),
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakKind::None => f.write_str("none"),
            BreakKind::All => f.write_str("all"),
            BreakKind::Event(kind) => write!(f, "{}", kind),
        }
    }
}

impl FromStr for BreakKind {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(BreakKind::None),
            "all" | "any" => Ok(BreakKind::All),
            other => other.parse().map(BreakKind::Event),
        }
    }
}

impl From<EventKind> for BreakKind {
    fn from(kind: EventKind) -> Self {
        BreakKind::Event(kind)
    }
}

/// Breakpoints currently set by the consumer
///
/// Lines are grammar lines as reported by location events (1-based); tokens are
/// token indices of the traced input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointSet {
    lines: BTreeSet<u32>,
    tokens: BTreeSet<i64>,
}

impl BreakpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a line breakpoint
    pub fn with_line(mut self, line: u32) -> Self {
        self.lines.insert(line);
        self
    }

    /// Builder method: add a token breakpoint
    pub fn with_token(mut self, index: i64) -> Self {
        self.tokens.insert(index);
        self
    }

    pub fn add_line(&mut self, line: u32) {
        self.lines.insert(line);
    }

    pub fn add_token(&mut self, index: i64) {
        self.tokens.insert(index);
    }

    pub fn has_line(&self, line: u32) -> bool {
        self.lines.contains(&line)
    }

    pub fn has_token(&self, index: i64) -> bool {
        self.tokens.contains(&index)
    }

    pub fn lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.lines.iter().copied()
    }

    pub fn tokens(&self) -> impl Iterator<Item = i64> + '_ {
        self.tokens.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.tokens.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.tokens.clear();
    }
}

/// State of a recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecorderStatus {
    #[default]
    Stopped,
    Stopping,
    Launching,
    Running,
    Break,
}

impl RecorderStatus {
    /// True while events are expected from the traced process
    pub fn is_running(&self) -> bool {
        matches!(self, RecorderStatus::Running | RecorderStatus::Break)
    }
}

impl fmt::Display for RecorderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderStatus::Stopped => "stopped",
            RecorderStatus::Stopping => "stopping",
            RecorderStatus::Launching => "launching",
            RecorderStatus::Running => "running",
            RecorderStatus::Break => "break",
        };
        f.write_str(name)
    }
}

/// Direction of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn delta(self) -> isize {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Result of walking the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Stopped on a matching event at this position
    Break(usize),
    /// Ran into the start or end of the log; the cursor stays clamped there
    Boundary,
}

impl StepOutcome {
    pub fn is_break(&self) -> bool {
        matches!(self, StepOutcome::Break(_))
    }
}

/// Does `event` satisfy the break condition?
///
/// Line and token breakpoints always apply. Stepping to the next consumed token
/// skips off-channel tokens unless a token breakpoint names them.
pub fn matches(event: &Event, kind: BreakKind, breakpoints: &BreakpointSet) -> bool {
    let wanted = match kind {
        BreakKind::None => return false,
        BreakKind::All => return true,
        BreakKind::Event(wanted) => wanted,
    };

    match event {
        Event::Location { line, .. } if breakpoints.has_line(*line) => true,
        Event::ConsumeToken { token, .. } if breakpoints.has_token(token.index) => true,
        Event::ConsumeToken { token, hidden } if wanted == EventKind::ConsumeToken => {
            !hidden && token.is_default_channel()
        }
        _ => event.kind() == wanted,
    }
}

/// The stepping state machine
#[derive(Debug, Clone, Default)]
pub struct StepEngine {
    break_kind: BreakKind,
    breakpoints: BreakpointSet,
    status: RecorderStatus,
    stopped_on: Option<EventKind>,
}

impl StepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> RecorderStatus {
        self.status
    }

    /// Change the status; returns true if it actually changed
    pub fn set_status(&mut self, status: RecorderStatus) -> bool {
        if self.status == status {
            return false;
        }
        log::debug!("Recorder status {} -> {}", self.status, status);
        self.status = status;
        true
    }

    pub fn break_kind(&self) -> BreakKind {
        self.break_kind
    }

    pub fn set_break_kind(&mut self, kind: BreakKind) {
        self.break_kind = kind;
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    pub fn set_breakpoints(&mut self, breakpoints: BreakpointSet) {
        self.breakpoints = breakpoints;
    }

    /// Kind of the event that caused the latest break
    pub fn stopped_on(&self) -> Option<EventKind> {
        self.stopped_on
    }

    /// Prepare a step: new break kind, fresh breakpoints
    ///
    /// A live session paused on a break goes back to running. Stepping through
    /// a finished recording leaves the status alone.
    pub fn continue_with(&mut self, kind: BreakKind, breakpoints: BreakpointSet) {
        self.break_kind = kind;
        self.breakpoints = breakpoints;
        if self.status == RecorderStatus::Break {
            self.set_status(RecorderStatus::Running);
        }
    }

    /// Evaluate the break condition on `event`
    ///
    /// A match remembers the event kind and, in a running session, moves the
    /// status to `Break`.
    pub fn check_break(&mut self, event: &Event) -> bool {
        if !matches(event, self.break_kind, &self.breakpoints) {
            return false;
        }
        log::debug!("Break on {} ({})", event.kind(), self.break_kind);
        self.force_break(event);
        true
    }

    /// Record a break that did not come from the break condition
    pub fn force_break(&mut self, event: &Event) {
        self.stopped_on = Some(event.kind());
        if self.status == RecorderStatus::Running {
            self.set_status(RecorderStatus::Break);
        }
    }

    /// Walk the log until a matching event or a boundary
    pub fn step_move(&mut self, log: &mut EventLog, direction: Direction) -> StepOutcome {
        let delta = direction.delta();
        let len = log.len() as isize;
        let mut position = log.cursor().map(|p| p as isize).unwrap_or(-1) + delta;

        if position < 0 {
            log.set_cursor(Some(0));
            return StepOutcome::Boundary;
        }
        if position >= len {
            log.move_to_end();
            return StepOutcome::Boundary;
        }

        while position >= 0 && position < len {
            let index = position as usize;
            log.set_cursor(Some(index));
            if let Some(event) = log.get(index) {
                if self.check_break(event) {
                    return StepOutcome::Break(index);
                }
            }
            position += delta;
        }

        log.set_cursor(Some((position - delta) as usize));
        StepOutcome::Boundary
    }
}
