//! Replay of recorded events
//!
//! The replayer rebuilds everything the consumer displays for a position in the
//! log: the reconstructed input, the rule stack, the parse tree, the AST, the
//! recognition exceptions and the last grammar location. It is fed either one
//! event at a time while a live session runs, or a whole prefix snapshot after
//! the cursor moved.

use crate::lookahead::{LookaheadReconstructor, ReconstructedInput};
use crate::tree::{AstBuilder, ParseTree};
use crate::types::{DebuggerError, Event, ExceptionInfo, NodeSource, Result, Token};
use std::collections::HashMap;

/// State rebuilt from a prefix of the event log
#[derive(Debug, Clone, Default)]
pub struct Replayer {
    reconstructor: LookaheadReconstructor,
    parse_tree: ParseTree,
    ast: AstBuilder,
    exceptions: Vec<ExceptionInfo>,
    /// Entered rules, outermost first, flagged when they also opened a parse tree node
    rules: Vec<(String, bool)>,
    last_location: Option<(u32, u32)>,
    /// Every token seen so far, for labelling AST nodes
    tokens: HashMap<i64, Token>,
    played: usize,
}

impl Replayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all replayed state
    pub fn reset(&mut self) {
        self.reconstructor.reset();
        self.parse_tree.reset();
        self.ast.reset();
        self.exceptions.clear();
        self.rules.clear();
        self.last_location = None;
        self.tokens.clear();
        self.played = 0;
    }

    /// Apply the next event of a live session
    ///
    /// The event counts as played even when it fails, so the replayer stays
    /// aligned with the log; the failure goes back to the caller.
    pub fn play_event(&mut self, event: &Event) -> Result<()> {
        self.played += 1;
        log::trace!("Replay #{}: {}", self.played - 1, event);
        self.apply(event)
    }

    /// Replay a prefix snapshot
    ///
    /// Continues from the events already played unless `reset` is set or the
    /// snapshot is shorter than what was played. A failing event is logged and
    /// skipped. Returns the number of failed events.
    pub fn play_prefix(&mut self, events: &[Event], reset: bool) -> usize {
        if reset || self.played > events.len() {
            self.reset();
        }
        let mut failures = 0;
        for event in &events[self.played..] {
            if let Err(e) = self.play_event(event) {
                log::warn!("Skipping event #{} ({}) during replay: {}", self.played - 1, event, e);
                failures += 1;
            }
        }
        failures
    }

    /// Replay a whole recording from the first event
    pub fn play_all(&mut self, events: &[Event]) -> usize {
        self.play_prefix(events, true)
    }

    fn apply(&mut self, event: &Event) -> Result<()> {
        self.reconstructor.apply(event);
        if let Some(token) = event.token() {
            self.tokens.entry(token.index).or_insert_with(|| token.clone());
        }

        // Only structure the parser committed to goes into the parse tree
        let speculative = self.reconstructor.active_frame().is_some() || self.reconstructor.resync_depth() > 0;

        match event {
            Event::EnterRule { name, .. } => {
                if !speculative {
                    self.parse_tree.enter_rule(name);
                }
                self.rules.push((name.clone(), !speculative));
            }
            Event::ExitRule { name, .. } => self.exit_rule(name)?,
            Event::ConsumeToken { token, hidden } if !speculative && !hidden && token.is_default_channel() => {
                self.parse_tree.add_token(token)
            }
            Event::RecognitionException { exception } => {
                if !speculative {
                    self.parse_tree.add_error(exception);
                }
                self.exceptions.push(exception.clone());
            }
            Event::Location { line, column } => self.last_location = Some((*line, *column)),
            Event::NilNode { id } => self.ast.nil_node(*id),
            Event::CreateNode { id, source } => match source {
                NodeSource::Token { token_index } => {
                    let text = self
                        .tokens
                        .get(token_index)
                        .map(|token| token.text.clone())
                        .unwrap_or_else(|| format!("@{}", token_index));
                    self.ast.create_node(*id, text, Some(*token_index));
                }
                NodeSource::Elements { text, .. } => self.ast.create_node(*id, text.clone(), None),
            },
            Event::BecomeRoot { new_root, old_root } => self.ast.become_root(*new_root, *old_root)?,
            Event::AddChild { root, child } => self.ast.add_child(*root, *child)?,
            Event::SetTokenBoundaries { id, start, stop } => self.ast.set_token_boundaries(*id, *start, *stop)?,
            _ => {}
        }
        Ok(())
    }

    fn exit_rule(&mut self, name: &str) -> Result<()> {
        match self.rules.last() {
            Some((innermost, _)) if innermost == name => {}
            innermost => {
                return Err(DebuggerError::RuleMismatch {
                    expected: innermost.map(|(rule, _)| rule.clone()),
                    found: name.to_string(),
                })
            }
        }
        if let Some((_, in_tree)) = self.rules.pop() {
            if in_tree {
                self.parse_tree.exit_rule(name)?;
            }
        }
        Ok(())
    }

    /// Number of events applied since the last reset
    pub fn played(&self) -> usize {
        self.played
    }

    pub fn input(&self) -> ReconstructedInput {
        self.reconstructor.input()
    }

    pub fn reconstructor(&self) -> &LookaheadReconstructor {
        &self.reconstructor
    }

    /// Rules entered and not yet exited, outermost first
    pub fn rule_stack(&self) -> Vec<&str> {
        self.rules.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn parse_tree(&self) -> &ParseTree {
        &self.parse_tree
    }

    pub fn ast(&self) -> &AstBuilder {
        &self.ast
    }

    pub fn exceptions(&self) -> &[ExceptionInfo] {
        &self.exceptions
    }

    /// Most recent grammar location as (line, column)
    pub fn last_location(&self) -> Option<(u32, u32)> {
        self.last_location
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DebuggerError;

    fn tok(index: i64, text: &str) -> Token {
        Token::new(index, 4, text)
    }

    fn indices<'a>(tokens: impl Iterator<Item = &'a Token>) -> Vec<i64> {
        tokens.map(|t| t.index).collect()
    }

    #[test]
    fn test_scenario_peeked_token_committed_once() {
        let events = vec![
            Event::Commence,
            Event::enter_decision(5),
            Event::LT { index: 1, token: tok(0, "a") },
            Event::LT { index: 2, token: tok(1, "b") },
            Event::ExitDecision { decision: 5 },
            Event::consume(tok(0, "a")),
            Event::Terminate,
        ];
        let mut replayer = Replayer::new();
        assert_eq!(replayer.play_all(&events), 0);

        let input = replayer.input();
        assert_eq!(indices(input.committed_tokens()), vec![0]);
        assert_eq!(replayer.played(), events.len());
    }

    #[test]
    fn test_rule_stack_and_parse_tree() {
        let events = vec![
            Event::Commence,
            Event::enter_rule("prog"),
            Event::Location { line: 2, column: 4 },
            Event::enter_rule("stat"),
            Event::consume(tok(0, "x")),
            Event::ConsumeToken { token: tok(1, " ").with_channel(99), hidden: true },
        ];
        let mut replayer = Replayer::new();
        replayer.play_all(&events);

        assert_eq!(replayer.rule_stack(), vec!["prog", "stat"]);
        assert_eq!(replayer.last_location(), Some((2, 4)));
        assert_eq!(replayer.parse_tree().render(), "prog\n  stat\n    \"x\"\n");
    }

    #[test]
    fn test_speculative_tokens_stay_out_of_parse_tree() {
        let events = vec![
            Event::enter_rule("prog"),
            Event::enter_decision(1),
            Event::consume(tok(0, "a")),
            Event::ExitDecision { decision: 1 },
            Event::BeginResync,
            Event::consume(tok(1, "?")),
            Event::EndResync,
            Event::consume(tok(2, "b")),
        ];
        let mut replayer = Replayer::new();
        replayer.play_all(&events);
        assert_eq!(replayer.parse_tree().render(), "prog\n  \"b\"\n");
    }

    #[test]
    fn test_rule_stack_follows_backtracking() {
        let events = vec![
            Event::enter_rule("prog"),
            Event::enter_decision(1),
            Event::Mark { marker: 0 },
            Event::enter_rule("synpred_target"),
        ];
        let mut replayer = Replayer::new();
        assert_eq!(replayer.play_all(&events), 0);
        assert_eq!(replayer.rule_stack(), vec!["prog", "synpred_target"]);
        assert_eq!(replayer.parse_tree().rule_stack(), vec!["prog"]);

        replayer.play_event(&Event::exit_rule("synpred_target")).unwrap();
        replayer.play_event(&Event::Rewind { marker: Some(0) }).unwrap();
        replayer.play_event(&Event::ExitDecision { decision: 1 }).unwrap();
        assert_eq!(replayer.rule_stack(), vec!["prog"]);
        replayer.play_event(&Event::exit_rule("prog")).unwrap();
        assert!(replayer.rule_stack().is_empty());
        assert_eq!(replayer.parse_tree().render(), "prog\n");
    }

    #[test]
    fn test_bulk_replay_skips_failing_events() {
        let events = vec![
            Event::enter_rule("prog"),
            Event::exit_rule("expr"),
            Event::AddChild { root: 1, child: 2 },
            Event::consume(tok(0, "a")),
        ];
        let mut replayer = Replayer::new();
        assert_eq!(replayer.play_all(&events), 2);
        assert_eq!(replayer.played(), 4);
        assert_eq!(indices(replayer.input().committed_tokens()), vec![0]);
    }

    #[test]
    fn test_live_replay_surfaces_failures() {
        let mut replayer = Replayer::new();
        replayer.play_event(&Event::enter_rule("prog")).unwrap();
        let err = replayer.play_event(&Event::exit_rule("expr")).unwrap_err();
        assert!(matches!(err, DebuggerError::RuleMismatch { .. }));
        assert_eq!(replayer.played(), 2);
    }

    #[test]
    fn test_incremental_and_reset_replay() {
        let events = vec![
            Event::consume(tok(0, "a")),
            Event::consume(tok(1, "b")),
            Event::consume(tok(2, "c")),
        ];
        let mut replayer = Replayer::new();
        replayer.play_prefix(&events[..1], false);
        replayer.play_prefix(&events, false);
        assert_eq!(indices(replayer.input().committed_tokens()), vec![0, 1, 2]);

        // A shorter prefix starts over
        replayer.play_prefix(&events[..2], false);
        assert_eq!(indices(replayer.input().committed_tokens()), vec![0, 1]);
        assert_eq!(replayer.played(), 2);
    }

    #[test]
    fn test_ast_and_exceptions() {
        let exception = ExceptionInfo {
            class_name: "org.antlr.runtime.MismatchedTokenException".to_string(),
            index: 3,
            line: 1,
            column: 6,
        };
        let events = vec![
            Event::consume(tok(0, "1")),
            Event::consume(tok(1, "+")),
            Event::consume(tok(2, "2")),
            Event::NilNode { id: 10 },
            Event::CreateNode { id: 11, source: NodeSource::Token { token_index: 1 } },
            Event::CreateNode { id: 12, source: NodeSource::Token { token_index: 0 } },
            Event::CreateNode { id: 13, source: NodeSource::Elements { token_type: 7, text: "EXPR".to_string() } },
            Event::AddChild { root: 11, child: 12 },
            Event::AddChild { root: 13, child: 11 },
            Event::RecognitionException { exception: exception.clone() },
        ];
        let mut replayer = Replayer::new();
        assert_eq!(replayer.play_all(&events), 0);
        assert_eq!(replayer.ast().to_string_tree(13), "(EXPR (+ 1))");
        assert_eq!(replayer.exceptions(), &[exception]);
    }
}
