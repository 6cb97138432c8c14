//! Reconstruction of the input the traced parser saw
//!
//! The parser does not only consume tokens: inside a decision it peeks ahead,
//! and while backtracking it consumes tokens it later gives back. None of that
//! leaves a trace in the final input, so it is rebuilt here from the event stream.
//!
//! Each decision gets a [`LookaheadFrame`] on a stack. Peeked tokens and tokens
//! consumed during an unmarked prediction stay in the frame and never reach the
//! committed input; tokens consumed after a `Mark` are committed and taken back
//! by the matching `Rewind`. Tokens consumed during error recovery are committed
//! as dead tokens.

use crate::types::{Event, Token};
use serde::Serialize;

/// How a committed token ended up in the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Matched by the parser
    Normal,
    /// Consumed off-channel
    Hidden,
    /// Skipped during error recovery
    Dead,
    /// Seen in the active lookahead frame only; never committed
    Lookahead,
}

/// One token of the reconstructed input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputEntry {
    pub token: Token,
    pub state: TokenState,
}

/// Speculative state of one decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookaheadFrame {
    /// Decision number that pushed the frame
    pub id: u32,
    /// Length of the committed input when the frame was pushed
    pub input_snapshot: usize,
    /// Tokens seen inside the frame, ordered and without duplicates
    pub tokens: Vec<Token>,
    /// Inside a mark/rewind region
    pub marked: bool,
    /// Committed length at the most recent mark
    pub mark_snapshot: Option<usize>,
    /// A disabled frame no longer collects tokens
    pub enabled: bool,
}

impl LookaheadFrame {
    fn new(id: u32, input_snapshot: usize) -> Self {
        Self {
            id,
            input_snapshot,
            tokens: Vec::new(),
            marked: false,
            mark_snapshot: None,
            enabled: true,
        }
    }

    fn record(&mut self, token: &Token) {
        if !self.tokens.contains(token) {
            self.tokens.push(token.clone());
        }
    }

    /// Discard the buffered tokens and stop collecting new ones
    fn flush(&mut self) {
        self.tokens.clear();
        self.enabled = false;
    }
}

/// Snapshot of the reconstructed input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconstructedInput {
    pub entries: Vec<InputEntry>,
}

impl ReconstructedInput {
    /// Tokens the parser committed to, hidden ones included, in input order
    pub fn committed_tokens(&self) -> impl Iterator<Item = &Token> {
        self.entries
            .iter()
            .filter(|e| matches!(e.state, TokenState::Normal | TokenState::Hidden))
            .map(|e| &e.token)
    }

    /// Tokens currently held by the active lookahead frame
    pub fn lookahead_tokens(&self) -> impl Iterator<Item = &Token> {
        self.entries
            .iter()
            .filter(|e| e.state == TokenState::Lookahead)
            .map(|e| &e.token)
    }

    /// Tokens skipped during error recovery
    pub fn dead_tokens(&self) -> impl Iterator<Item = &Token> {
        self.entries.iter().filter(|e| e.state == TokenState::Dead).map(|e| &e.token)
    }

    /// Visible text: committed tokens followed by the active lookahead
    pub fn visible_text(&self) -> String {
        self.entries
            .iter()
            .filter(|e| e.state != TokenState::Dead)
            .map(|e| e.token.text.as_str())
            .collect()
    }
}

/// Stack-based rebuild of the traced input
#[derive(Debug, Clone, Default)]
pub struct LookaheadReconstructor {
    committed: Vec<InputEntry>,
    frames: Vec<LookaheadFrame>,
    resync_depth: u32,
}

impl LookaheadReconstructor {
    /// Create an empty reconstructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, ready for a replay from the first event
    pub fn reset(&mut self) {
        self.committed.clear();
        self.frames.clear();
        self.resync_depth = 0;
    }

    /// Feed one event
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::EnterRule { .. }
            | Event::ExitRule { .. }
            | Event::EnterSubrule { .. }
            | Event::ExitSubrule { .. } => self.flush_active(),
            Event::EnterDecision { decision, .. } => self.enter_decision(*decision),
            Event::ExitDecision { decision } => self.exit_decision(*decision),
            Event::ConsumeToken { token, hidden } => self.consume_token(token, *hidden),
            Event::LT { index, token } => self.lookahead(*index, token),
            Event::Mark { .. } => self.mark(),
            Event::Rewind { .. } => self.rewind(),
            Event::BeginResync => self.resync_depth += 1,
            Event::EndResync => self.resync_depth = self.resync_depth.saturating_sub(1),
            Event::Terminate if !self.frames.is_empty() => {
                log::warn!("Trace terminated with {} lookahead frame(s) still open", self.frames.len());
            }
            _ => {}
        }
    }

    /// Push a frame for a new decision
    pub fn enter_decision(&mut self, id: u32) {
        self.flush_active();
        self.frames.push(LookaheadFrame::new(id, self.committed.len()));
    }

    /// Pop the frame of a finished decision, dropping its buffered tokens
    pub fn exit_decision(&mut self, id: u32) {
        match self.frames.last() {
            None => log::warn!("Lookahead stack is empty while exiting decision {}", id),
            Some(top) if top.id != id => {
                log::warn!("Innermost lookahead frame belongs to decision {}, not {}", top.id, id);
            }
            Some(_) => {
                self.frames.pop();
            }
        }
    }

    fn consume_token(&mut self, token: &Token, hidden: bool) {
        if self.resync_depth > 0 {
            self.discard_active();
            self.commit(token, TokenState::Dead);
            return;
        }

        let state = if hidden { TokenState::Hidden } else { TokenState::Normal };
        let buffered = matches!(self.active_frame(), Some(frame) if !frame.marked);
        if buffered {
            if let Some(frame) = self.active_frame_mut() {
                frame.record(token);
            }
        } else {
            self.commit(token, state);
        }
    }

    fn lookahead(&mut self, index: i32, token: &Token) {
        let committed_len = self.committed.len();
        let Some(frame) = self.active_frame_mut() else {
            return;
        };
        let mut truncate_to = None;
        if index == 1 && !frame.marked {
            frame.tokens.clear();
            truncate_to = Some(frame.input_snapshot.min(committed_len));
        }
        frame.record(token);
        if let Some(len) = truncate_to {
            self.committed.truncate(len);
        }
    }

    fn mark(&mut self) {
        let committed_len = self.committed.len();
        if let Some(frame) = self.active_frame_mut() {
            frame.marked = true;
            frame.mark_snapshot = Some(committed_len);
        }
    }

    fn rewind(&mut self) {
        let Some(frame) = self.active_frame_mut() else {
            return;
        };
        frame.marked = false;
        frame.tokens.clear();
        let restore_to = frame.mark_snapshot.take().unwrap_or(frame.input_snapshot);
        self.committed.truncate(restore_to);
    }

    fn commit(&mut self, token: &Token, state: TokenState) {
        self.committed.push(InputEntry {
            token: token.clone(),
            state,
        });
    }

    /// Discard the buffered tokens of the enabled top frame, unless it is backtracking
    ///
    /// Rule and subrule boundaries land here too. A marked frame survives them so
    /// its `Rewind` can still restore the input to the mark.
    fn flush_active(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            if frame.enabled && !frame.marked {
                frame.flush();
            }
        }
    }

    /// Error recovery drops the enabled top frame, marked or not
    fn discard_active(&mut self) {
        if let Some(frame) = self.active_frame_mut() {
            frame.flush();
        }
    }

    fn active_frame_mut(&mut self) -> Option<&mut LookaheadFrame> {
        self.frames.last_mut().filter(|frame| frame.enabled)
    }

    /// Innermost frame that still collects tokens
    pub fn active_frame(&self) -> Option<&LookaheadFrame> {
        self.frames.last().filter(|frame| frame.enabled)
    }

    /// All frames, outermost first
    pub fn frames(&self) -> &[LookaheadFrame] {
        &self.frames
    }

    /// Current error-recovery nesting
    pub fn resync_depth(&self) -> u32 {
        self.resync_depth
    }

    /// Number of committed entries, dead tokens included
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Committed input plus the tokens of the active frame
    pub fn input(&self) -> ReconstructedInput {
        let mut entries = self.committed.clone();
        if let Some(frame) = self.active_frame() {
            entries.extend(frame.tokens.iter().map(|token| InputEntry {
                token: token.clone(),
                state: TokenState::Lookahead,
            }));
        }
        ReconstructedInput { entries }
    }
}
