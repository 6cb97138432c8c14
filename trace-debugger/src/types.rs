//! Core types for the trace debugger library
//!
//! This module defines the fundamental values the debugger records: the tokens the
//! traced parser saw, the events it reported, and the errors the engine can raise.
//! Events are immutable once created; the event log only ever appends them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Result type for debugger operations
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// Identifier of a tree node created by the traced parser
pub type NodeId = i64;

/// Channel carrying the tokens the parser actually matches
pub const DEFAULT_CHANNEL: u32 = 0;

/// Token type of the end-of-file token
pub const EOF_TOKEN_TYPE: i32 = -1;

/// A token as reported by the traced process
///
/// Tokens are opaque to the debugger apart from their index, channel and text.
/// Two tokens are equal when they carry the same token index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Position of the token in the traced token stream
    pub index: i64,
    /// Token type as defined by the traced grammar
    pub token_type: i32,
    /// Channel the lexer placed the token on
    pub channel: u32,
    /// Line of the token in the traced input (1-based)
    pub line: u32,
    /// Character position of the token in its line (0-based)
    pub column: u32,
    /// Matched text
    pub text: String,
}

impl Token {
    /// Create a token on the default channel
    pub fn new(index: i64, token_type: i32, text: impl Into<String>) -> Self {
        Self {
            index,
            token_type,
            channel: DEFAULT_CHANNEL,
            line: 0,
            column: 0,
            text: text.into(),
        }
    }

    /// Builder method: place the token on another channel
    pub fn with_channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    /// Builder method: set the source position of the token
    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// True if the token is on the channel the parser matches against
    pub fn is_default_channel(&self) -> bool {
        self.channel == DEFAULT_CHANNEL
    }

    /// True for the end-of-file token
    pub fn is_eof(&self) -> bool {
        self.token_type == EOF_TOKEN_TYPE
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eof() {
            return write!(f, "[@{} <EOF>]", self.index);
        }
        write!(f, "[@{} {:?}", self.index, self.text)?;
        if !self.is_default_channel() {
            write!(f, " channel={}", self.channel)?;
        }
        write!(f, " {}:{}]", self.line, self.column)
    }
}

/// Payload of a recognition exception raised inside the traced parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Exception class name as reported by the traced process
    pub class_name: String,
    /// Index of the offending token
    pub index: i64,
    /// Line of the offending token
    pub line: u32,
    /// Character position of the offending token
    pub column: u32,
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.class_name.rsplit('.').next().unwrap_or(&self.class_name);
        write!(f, "{} at {}:{} (token {})", short, self.line, self.column, self.index)
    }
}

/// How the traced parser described a newly created tree node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum NodeSource {
    /// Node created from a token of the input stream
    Token { token_index: i64 },
    /// Imaginary node created from a token type and text
    Elements { token_type: i32, text: String },
}

/// One occurrence in the traced execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// The traced process started; synthesized after the handshake
    Commence,
    /// Rule invocation
    EnterRule {
        grammar: Option<String>,
        name: String,
    },
    /// Rule return
    ExitRule {
        grammar: Option<String>,
        name: String,
    },
    EnterSubrule {
        decision: u32,
    },
    ExitSubrule {
        decision: u32,
    },
    /// Start of a prediction; lookahead peeks follow
    EnterDecision {
        decision: u32,
        could_backtrack: bool,
    },
    ExitDecision {
        decision: u32,
    },
    EnterAlt {
        alt: u32,
    },
    /// Grammar position about to be executed (1-based line)
    Location {
        line: u32,
        column: u32,
    },
    /// Token consumed by the parser, `hidden` when it came off-channel
    ConsumeToken {
        token: Token,
        hidden: bool,
    },
    /// Lookahead peek at position `index`
    #[serde(rename = "lt")]
    LT {
        index: i32,
        token: Token,
    },
    /// Backtrack checkpoint
    Mark {
        marker: i32,
    },
    /// Backtrack restore; `None` rewinds to the last mark
    Rewind {
        marker: Option<i32>,
    },
    RecognitionException {
        exception: ExceptionInfo,
    },
    BeginResync,
    EndResync,
    BeginBacktrack {
        level: u32,
    },
    EndBacktrack {
        level: u32,
        successful: bool,
    },
    /// The traced process finished
    Terminate,
    NilNode {
        id: NodeId,
    },
    CreateNode {
        id: NodeId,
        source: NodeSource,
    },
    BecomeRoot {
        new_root: NodeId,
        old_root: NodeId,
    },
    AddChild {
        root: NodeId,
        child: NodeId,
    },
    SetTokenBoundaries {
        id: NodeId,
        start: i64,
        stop: i64,
    },
}

impl Event {
    /// Get the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Commence => EventKind::Commence,
            Event::EnterRule { .. } => EventKind::EnterRule,
            Event::ExitRule { .. } => EventKind::ExitRule,
            Event::EnterSubrule { .. } => EventKind::EnterSubrule,
            Event::ExitSubrule { .. } => EventKind::ExitSubrule,
            Event::EnterDecision { .. } => EventKind::EnterDecision,
            Event::ExitDecision { .. } => EventKind::ExitDecision,
            Event::EnterAlt { .. } => EventKind::EnterAlt,
            Event::Location { .. } => EventKind::Location,
            Event::ConsumeToken { .. } => EventKind::ConsumeToken,
            Event::LT { .. } => EventKind::LT,
            Event::Mark { .. } => EventKind::Mark,
            Event::Rewind { .. } => EventKind::Rewind,
            Event::RecognitionException { .. } => EventKind::RecognitionException,
            Event::BeginResync => EventKind::BeginResync,
            Event::EndResync => EventKind::EndResync,
            Event::BeginBacktrack { .. } => EventKind::BeginBacktrack,
            Event::EndBacktrack { .. } => EventKind::EndBacktrack,
            Event::Terminate => EventKind::Terminate,
            Event::NilNode { .. } => EventKind::NilNode,
            Event::CreateNode { .. } => EventKind::CreateNode,
            Event::BecomeRoot { .. } => EventKind::BecomeRoot,
            Event::AddChild { .. } => EventKind::AddChild,
            Event::SetTokenBoundaries { .. } => EventKind::SetTokenBoundaries,
        }
    }

    /// Get the token carried by this event (if any)
    pub fn token(&self) -> Option<&Token> {
        match self {
            Event::ConsumeToken { token, .. } | Event::LT { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Convenience constructor for a consumed token, hidden if off-channel
    pub fn consume(token: Token) -> Self {
        let hidden = !token.is_default_channel();
        Event::ConsumeToken { token, hidden }
    }

    /// Convenience constructor for a rule entry without grammar name
    pub fn enter_rule(name: impl Into<String>) -> Self {
        Event::EnterRule {
            grammar: None,
            name: name.into(),
        }
    }

    /// Convenience constructor for a rule exit without grammar name
    pub fn exit_rule(name: impl Into<String>) -> Self {
        Event::ExitRule {
            grammar: None,
            name: name.into(),
        }
    }

    /// Convenience constructor for a decision entry
    pub fn enter_decision(decision: u32) -> Self {
        Event::EnterDecision {
            decision,
            could_backtrack: false,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Commence => write!(f, "Commence"),
            Event::EnterRule { name, .. } => write!(f, "Enter rule {}", name),
            Event::ExitRule { name, .. } => write!(f, "Exit rule {}", name),
            Event::EnterSubrule { decision } => write!(f, "Enter subrule {}", decision),
            Event::ExitSubrule { decision } => write!(f, "Exit subrule {}", decision),
            Event::EnterDecision { decision, .. } => write!(f, "Enter decision {}", decision),
            Event::ExitDecision { decision } => write!(f, "Exit decision {}", decision),
            Event::EnterAlt { alt } => write!(f, "Enter alternative {}", alt),
            Event::Location { line, column } => write!(f, "Location {}:{}", line, column),
            Event::ConsumeToken { token, hidden } => {
                if *hidden {
                    write!(f, "Consume hidden {}", token)
                } else {
                    write!(f, "Consume {}", token)
                }
            }
            Event::LT { index, token } => write!(f, "LT {} {}", index, token),
            Event::Mark { marker } => write!(f, "Mark {}", marker),
            Event::Rewind { marker: Some(marker) } => write!(f, "Rewind {}", marker),
            Event::Rewind { marker: None } => write!(f, "Rewind"),
            Event::RecognitionException { exception } => write!(f, "Exception {}", exception),
            Event::BeginResync => write!(f, "Begin resync"),
            Event::EndResync => write!(f, "End resync"),
            Event::BeginBacktrack { level } => write!(f, "Begin backtrack {}", level),
            Event::EndBacktrack { level, successful } => {
                write!(f, "End backtrack {} ({})", level, if *successful { "succeeded" } else { "failed" })
            }
            Event::Terminate => write!(f, "Terminate"),
            Event::NilNode { id } => write!(f, "Nil node {}", id),
            Event::CreateNode { id, source } => match source {
                NodeSource::Token { token_index } => write!(f, "Create node {} from token {}", id, token_index),
                NodeSource::Elements { text, .. } => write!(f, "Create node {} {:?}", id, text),
            },
            Event::BecomeRoot { new_root, old_root } => write!(f, "Become root {} <- {}", new_root, old_root),
            Event::AddChild { root, child } => write!(f, "Add child {} -> {}", child, root),
            Event::SetTokenBoundaries { id, start, stop } => {
                write!(f, "Token boundaries of {}: {}..{}", id, start, stop)
            }
        }
    }
}

/// Discriminant of [`Event`], used to select break conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Commence,
    EnterRule,
    ExitRule,
    EnterSubrule,
    ExitSubrule,
    EnterDecision,
    ExitDecision,
    EnterAlt,
    Location,
    ConsumeToken,
    #[serde(rename = "lt")]
    LT,
    Mark,
    Rewind,
    RecognitionException,
    BeginResync,
    EndResync,
    BeginBacktrack,
    EndBacktrack,
    Terminate,
    NilNode,
    CreateNode,
    BecomeRoot,
    AddChild,
    SetTokenBoundaries,
}

impl EventKind {
    /// Every event kind, in declaration order
    pub const ALL: [EventKind; 24] = [
        EventKind::Commence,
        EventKind::EnterRule,
        EventKind::ExitRule,
        EventKind::EnterSubrule,
        EventKind::ExitSubrule,
        EventKind::EnterDecision,
        EventKind::ExitDecision,
        EventKind::EnterAlt,
        EventKind::Location,
        EventKind::ConsumeToken,
        EventKind::LT,
        EventKind::Mark,
        EventKind::Rewind,
        EventKind::RecognitionException,
        EventKind::BeginResync,
        EventKind::EndResync,
        EventKind::BeginBacktrack,
        EventKind::EndBacktrack,
        EventKind::Terminate,
        EventKind::NilNode,
        EventKind::CreateNode,
        EventKind::BecomeRoot,
        EventKind::AddChild,
        EventKind::SetTokenBoundaries,
    ];

    /// Snake-case name used on the command line and in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Commence => "commence",
            EventKind::EnterRule => "enter_rule",
            EventKind::ExitRule => "exit_rule",
            EventKind::EnterSubrule => "enter_subrule",
            EventKind::ExitSubrule => "exit_subrule",
            EventKind::EnterDecision => "enter_decision",
            EventKind::ExitDecision => "exit_decision",
            EventKind::EnterAlt => "enter_alt",
            EventKind::Location => "location",
            EventKind::ConsumeToken => "consume_token",
            EventKind::LT => "lt",
            EventKind::Mark => "mark",
            EventKind::Rewind => "rewind",
            EventKind::RecognitionException => "recognition_exception",
            EventKind::BeginResync => "begin_resync",
            EventKind::EndResync => "end_resync",
            EventKind::BeginBacktrack => "begin_backtrack",
            EventKind::EndBacktrack => "end_backtrack",
            EventKind::Terminate => "terminate",
            EventKind::NilNode => "nil_node",
            EventKind::CreateNode => "create_node",
            EventKind::BecomeRoot => "become_root",
            EventKind::AddChild => "add_child",
            EventKind::SetTokenBoundaries => "set_token_boundaries",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| DebuggerError::InvalidBreakKind(s.to_string()))
    }
}

/// Errors that can occur while recording or replaying a trace
#[derive(Debug, thiserror::Error)]
pub enum DebuggerError {
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("A connection attempt is already in progress")]
    ConnectInFlight,

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Rule exit {found} does not match the innermost rule {expected:?}")]
    RuleMismatch {
        expected: Option<String>,
        found: String,
    },

    #[error("Unknown tree node: {0}")]
    UnknownNode(NodeId),

    #[error("Invalid break kind: {0}")]
    InvalidBreakKind(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_equality_by_index() {
        let a = Token::new(3, 4, "foo");
        let b = Token::new(3, 7, "bar").with_channel(99);
        let c = Token::new(4, 4, "foo");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_token_channel_classification() {
        assert!(Token::new(0, 4, "x").is_default_channel());
        assert!(!Token::new(1, 5, " ").with_channel(99).is_default_channel());
        assert!(Token::new(2, EOF_TOKEN_TYPE, "<EOF>").is_eof());
    }

    #[test]
    fn test_consume_constructor_marks_off_channel_tokens_hidden() {
        let visible = Event::consume(Token::new(0, 4, "a"));
        let hidden = Event::consume(Token::new(1, 5, " ").with_channel(99));

        assert_eq!(visible, Event::ConsumeToken { token: Token::new(0, 4, "a"), hidden: false });
        assert!(matches!(hidden, Event::ConsumeToken { hidden: true, .. }));
    }

    #[test]
    fn test_event_kind_names_parse_back() {
        for kind in EventKind::ALL {
            assert_eq!(kind.name().parse::<EventKind>().unwrap(), kind);
        }
        assert_eq!("Consume-Token".parse::<EventKind>().unwrap(), EventKind::ConsumeToken);
        assert!("bogus".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::enter_rule("expr")), "Enter rule expr");
        assert_eq!(format!("{}", Event::Location { line: 3, column: 7 }), "Location 3:7");
        assert_eq!(format!("{}", Event::Rewind { marker: None }), "Rewind");
    }

    #[test]
    fn test_exception_display_uses_short_class_name() {
        let info = ExceptionInfo {
            class_name: "org.antlr.runtime.MismatchedTokenException".to_string(),
            index: 5,
            line: 2,
            column: 4,
        };
        assert_eq!(format!("{}", info), "MismatchedTokenException at 2:4 (token 5)");
    }
}
