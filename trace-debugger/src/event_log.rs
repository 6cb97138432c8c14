//! Append-only event log with a movable cursor
//!
//! The log is the single record of a debugging session. The receiver appends to it,
//! the step engine moves its cursor, and the replayer reads prefix snapshots of it.
//! The log itself is not synchronized; the recorder keeps it behind its one lock.

use crate::types::{Event, EventKind};

/// Ordered sequence of recorded events plus the current position
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
    cursor: Option<usize>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all events and clear the cursor
    pub fn reset(&mut self) {
        self.events.clear();
        self.cursor = None;
    }

    /// Append an event; the cursor follows to the new last event
    pub fn append(&mut self, event: Event) {
        self.events.push(event);
        self.cursor = Some(self.events.len() - 1);
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Current position, `None` when there is no current event
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Move the cursor; positions past the end are clamped to the last event
    pub fn set_cursor(&mut self, position: Option<usize>) {
        self.cursor = match position {
            Some(_) if self.events.is_empty() => None,
            Some(position) => Some(position.min(self.events.len() - 1)),
            None => None,
        };
    }

    /// Move the cursor to the last event
    pub fn move_to_end(&mut self) {
        self.cursor = self.events.len().checked_sub(1);
    }

    /// Event at `position`
    pub fn get(&self, position: usize) -> Option<&Event> {
        self.events.get(position)
    }

    /// Event at the cursor
    pub fn current(&self) -> Option<&Event> {
        self.cursor.and_then(|position| self.events.get(position))
    }

    /// Last recorded event
    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Copy of the events from the start up to and including the cursor
    ///
    /// The copy is independent of the log, so it can be replayed while new
    /// events keep arriving.
    pub fn prefix_snapshot(&self) -> Vec<Event> {
        match self.cursor {
            Some(position) => self.snapshot_through(position),
            None => Vec::new(),
        }
    }

    /// Copy of the events from the start up to and including `position`
    pub fn snapshot_through(&self, position: usize) -> Vec<Event> {
        if self.events.is_empty() {
            return Vec::new();
        }
        self.events[..=position.min(self.events.len() - 1)].to_vec()
    }

    /// True if the cursor is on the first event
    pub fn is_at_start(&self) -> bool {
        self.cursor == Some(0)
    }

    /// True if there is no current event or the current event is the terminate event
    pub fn is_at_end(&self) -> bool {
        match self.current() {
            Some(event) => event.kind() == EventKind::Terminate,
            None => true,
        }
    }

    /// Iterate over all recorded events
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}
