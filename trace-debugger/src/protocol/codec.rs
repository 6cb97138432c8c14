//! Line codec of the remote parser-debug protocol
//!
//! Every event travels as one line of TAB-separated fields, the event name first.
//! Tokens are serialized as `index type channel line pos "text` with the text
//! percent-escaped so it never contains a line break.

use crate::types::{DebuggerError, Event, ExceptionInfo, NodeSource, Result, Token};

/// Decode one event line
///
/// Returns `Ok(None)` for lines the debugger accepts but does not record
/// (semantic predicate evaluations).
pub fn decode_event(line: &str) -> Result<Option<Event>> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let (name, rest) = match line.split_once('\t') {
        Some((name, rest)) => (name, rest),
        None => (line, ""),
    };
    let fields: Vec<&str> = if rest.is_empty() { Vec::new() } else { rest.split('\t').collect() };

    let event = match name {
        "enterRule" | "exitRule" => {
            let (grammar, rule) = match fields.as_slice() {
                [rule] => (None, *rule),
                [grammar, rule, ..] => (Some(grammar.to_string()), *rule),
                [] => return Err(missing(name, "rule name")),
            };
            if name == "enterRule" {
                Event::EnterRule { grammar, name: rule.to_string() }
            } else {
                Event::ExitRule { grammar, name: rule.to_string() }
            }
        }
        "enterSubRule" => Event::EnterSubrule { decision: field(&fields, 0, name)? },
        "exitSubRule" => Event::ExitSubrule { decision: field(&fields, 0, name)? },
        "enterDecision" => Event::EnterDecision {
            decision: field(&fields, 0, name)?,
            could_backtrack: match fields.get(1) {
                Some(flag) => parse_bool(flag, name)?,
                None => false,
            },
        },
        "exitDecision" => Event::ExitDecision { decision: field(&fields, 0, name)? },
        "enterAlt" => Event::EnterAlt { alt: field(&fields, 0, name)? },
        "location" => Event::Location {
            line: field(&fields, 0, name)?,
            column: field(&fields, 1, name)?,
        },
        "consumeToken" => Event::ConsumeToken { token: decode_token(rest)?, hidden: false },
        "consumeHiddenToken" => Event::ConsumeToken { token: decode_token(rest)?, hidden: true },
        "LT" => {
            let (index, token) = rest
                .split_once('\t')
                .ok_or_else(|| missing(name, "token"))?;
            Event::LT {
                index: parse_number(index, name)?,
                token: decode_token(token)?,
            }
        }
        "mark" => Event::Mark { marker: field(&fields, 0, name)? },
        "rewind" => Event::Rewind {
            marker: match fields.first() {
                Some(marker) => Some(parse_number(marker, name)?),
                None => None,
            },
        },
        "beginBacktrack" => Event::BeginBacktrack { level: field(&fields, 0, name)? },
        "endBacktrack" => Event::EndBacktrack {
            level: field(&fields, 0, name)?,
            successful: parse_bool(fields.get(1).ok_or_else(|| missing(name, "success flag"))?, name)?,
        },
        "exception" => Event::RecognitionException {
            exception: ExceptionInfo {
                class_name: fields.first().ok_or_else(|| missing(name, "class name"))?.to_string(),
                index: field(&fields, 1, name)?,
                line: field(&fields, 2, name)?,
                column: field(&fields, 3, name)?,
            },
        },
        "beginResync" => Event::BeginResync,
        "endResync" => Event::EndResync,
        "semanticPredicate" => {
            log::trace!("Ignoring semantic predicate event: {}", rest);
            return Ok(None);
        }
        "commence" => Event::Commence,
        "terminate" => Event::Terminate,
        "nilNode" => Event::NilNode { id: field(&fields, 0, name)? },
        "createNode" => Event::CreateNode {
            id: field(&fields, 0, name)?,
            source: NodeSource::Token { token_index: field(&fields, 1, name)? },
        },
        "createNodeFromTokenElements" => {
            let mut parts = rest.splitn(3, '\t');
            let id = parse_number(parts.next().unwrap_or_default(), name)?;
            let token_type = parse_number(parts.next().ok_or_else(|| missing(name, "token type"))?, name)?;
            let text = unescape_text(parts.next().unwrap_or_default().trim_start_matches('"'));
            Event::CreateNode { id, source: NodeSource::Elements { token_type, text } }
        }
        "becomeRoot" => Event::BecomeRoot {
            new_root: field(&fields, 0, name)?,
            old_root: field(&fields, 1, name)?,
        },
        "addChild" => Event::AddChild {
            root: field(&fields, 0, name)?,
            child: field(&fields, 1, name)?,
        },
        "setTokenBoundaries" => Event::SetTokenBoundaries {
            id: field(&fields, 0, name)?,
            start: field(&fields, 1, name)?,
            stop: field(&fields, 2, name)?,
        },
        other => return Err(DebuggerError::UnknownEvent(other.to_string())),
    };

    Ok(Some(event))
}

/// Encode one event as a protocol line (without trailing newline)
///
/// The commence event is never transmitted; the receiving side synthesizes it
/// once the handshake completes, so it encodes to `None`.
pub fn encode_event(event: &Event) -> Option<String> {
    let line = match event {
        Event::Commence => return None,
        Event::EnterRule { grammar, name } => rule_line("enterRule", grammar, name),
        Event::ExitRule { grammar, name } => rule_line("exitRule", grammar, name),
        Event::EnterSubrule { decision } => format!("enterSubRule\t{}", decision),
        Event::ExitSubrule { decision } => format!("exitSubRule\t{}", decision),
        Event::EnterDecision { decision, could_backtrack } => {
            format!("enterDecision\t{}\t{}", decision, could_backtrack)
        }
        Event::ExitDecision { decision } => format!("exitDecision\t{}", decision),
        Event::EnterAlt { alt } => format!("enterAlt\t{}", alt),
        Event::Location { line, column } => format!("location\t{}\t{}", line, column),
        Event::ConsumeToken { token, hidden: false } => format!("consumeToken\t{}", encode_token(token)),
        Event::ConsumeToken { token, hidden: true } => format!("consumeHiddenToken\t{}", encode_token(token)),
        Event::LT { index, token } => format!("LT\t{}\t{}", index, encode_token(token)),
        Event::Mark { marker } => format!("mark\t{}", marker),
        Event::Rewind { marker: Some(marker) } => format!("rewind\t{}", marker),
        Event::Rewind { marker: None } => "rewind".to_string(),
        Event::RecognitionException { exception } => format!(
            "exception\t{}\t{}\t{}\t{}",
            exception.class_name, exception.index, exception.line, exception.column
        ),
        Event::BeginResync => "beginResync".to_string(),
        Event::EndResync => "endResync".to_string(),
        Event::BeginBacktrack { level } => format!("beginBacktrack\t{}", level),
        Event::EndBacktrack { level, successful } => {
            format!("endBacktrack\t{}\t{}", level, if *successful { 1 } else { 0 })
        }
        Event::Terminate => "terminate".to_string(),
        Event::NilNode { id } => format!("nilNode\t{}", id),
        Event::CreateNode { id, source: NodeSource::Token { token_index } } => {
            format!("createNode\t{}\t{}", id, token_index)
        }
        Event::CreateNode { id, source: NodeSource::Elements { token_type, text } } => {
            format!("createNodeFromTokenElements\t{}\t{}\t\"{}", id, token_type, escape_text(text))
        }
        Event::BecomeRoot { new_root, old_root } => format!("becomeRoot\t{}\t{}", new_root, old_root),
        Event::AddChild { root, child } => format!("addChild\t{}\t{}", root, child),
        Event::SetTokenBoundaries { id, start, stop } => {
            format!("setTokenBoundaries\t{}\t{}\t{}", id, start, stop)
        }
    };
    Some(line)
}

/// Decode a serialized token (`index type channel line pos "text`)
pub fn decode_token(serialized: &str) -> Result<Token> {
    let mut parts = serialized.splitn(6, '\t');
    let mut next = |what: &str| {
        parts
            .next()
            .ok_or_else(|| DebuggerError::ProtocolError(format!("token is missing its {}: {:?}", what, serialized)))
    };

    let index = parse_number(next("index")?, "token")?;
    let token_type = parse_number(next("type")?, "token")?;
    let channel = parse_number(next("channel")?, "token")?;
    let line = parse_number(next("line")?, "token")?;
    let column = parse_number(next("position")?, "token")?;
    let text = match next("text") {
        Ok(raw) => unescape_text(raw.strip_prefix('"').unwrap_or(raw)),
        Err(_) => String::new(),
    };

    Ok(Token { index, token_type, channel, line, column, text })
}

/// Serialize a token the way the traced process does
pub fn encode_token(token: &Token) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t\"{}",
        token.index,
        token.token_type,
        token.channel,
        token.line,
        token.column,
        escape_text(&token.text)
    )
}

/// Escape token text so it fits on one protocol line
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '\n' => escaped.push_str("%0A"),
            '\r' => escaped.push_str("%0D"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Reverse of [`escape_text`]; unknown escapes are kept verbatim
pub fn unescape_text(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('%') {
        unescaped.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let (replacement, consumed) = if tail.starts_with("%0A") {
            ('\n', 3)
        } else if tail.starts_with("%0D") {
            ('\r', 3)
        } else if tail.starts_with("%25") {
            ('%', 3)
        } else {
            ('%', 1)
        };
        unescaped.push(replacement);
        rest = &tail[consumed..];
    }
    unescaped.push_str(rest);
    unescaped
}

fn rule_line(name: &str, grammar: &Option<String>, rule: &str) -> String {
    match grammar {
        Some(grammar) => format!("{}\t{}\t{}", name, grammar, rule),
        None => format!("{}\t{}", name, rule),
    }
}

fn field<T: std::str::FromStr>(fields: &[&str], index: usize, event: &str) -> Result<T> {
    let raw = fields
        .get(index)
        .ok_or_else(|| missing(event, &format!("field {}", index + 1)))?;
    parse_number(raw, event)
}

fn parse_number<T: std::str::FromStr>(raw: &str, event: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DebuggerError::ProtocolError(format!("{}: invalid number {:?}", event, raw)))
}

fn parse_bool(raw: &str, event: &str) -> Result<bool> {
    match raw.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(DebuggerError::ProtocolError(format!("{}: invalid flag {:?}", event, other))),
    }
}

fn missing(event: &str, what: &str) -> DebuggerError {
    DebuggerError::ProtocolError(format!("{}: missing {}", event, what))
}
