//! Interactive commands read from stdin

use anyhow::{anyhow, bail, Context, Result};
use trace_debugger::{BreakKind, EventKind};

/// One console command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Step forward; `None` reuses the current break kind
    Step(Option<BreakKind>),
    Back(Option<BreakKind>),
    /// Run until a breakpoint or the end of the trace
    Continue,
    Start,
    End,
    Input,
    Rules,
    Tree,
    BreakLine(u32),
    BreakToken(i64),
    Clear,
    Status,
    Stop,
    Quit,
    Help,
}

impl Command {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        if verb == "break" {
            return parse_break(line).map(Some);
        }
        let argument = words.next();
        if let Some(extra) = words.next() {
            bail!("Unexpected argument {:?}", extra);
        }

        let command = match verb {
            "step" | "s" => Command::Step(parse_kind(argument)?),
            "back" | "b" => Command::Back(parse_kind(argument)?),
            "continue" | "c" => Command::Continue,
            "start" => Command::Start,
            "end" => Command::End,
            "input" => Command::Input,
            "rules" => Command::Rules,
            "tree" => Command::Tree,
            "clear" => Command::Clear,
            "status" => Command::Status,
            "stop" => Command::Stop,
            "quit" | "q" | "exit" => Command::Quit,
            "help" | "?" => Command::Help,
            other => bail!("Unknown command {:?} (try `help`)", other),
        };
        Ok(Some(command))
    }
}

/// Break kind that only stops on breakpoints and at the end
pub fn continue_kind() -> BreakKind {
    BreakKind::Event(EventKind::Terminate)
}

fn parse_kind(argument: Option<&str>) -> Result<Option<BreakKind>> {
    argument
        .map(|kind| kind.parse::<BreakKind>().with_context(|| format!("Invalid break kind {:?}", kind)))
        .transpose()
}

fn parse_break(line: &str) -> Result<Command> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["break", "line", n] => Ok(Command::BreakLine(n.parse().with_context(|| format!("Invalid line {:?}", n))?)),
        ["break", "token", i] => {
            Ok(Command::BreakToken(i.parse().with_context(|| format!("Invalid token index {:?}", i))?))
        }
        _ => Err(anyhow!("Usage: break line N | break token I")),
    }
}

pub const HELP: &str = "\
Commands:
  step [kind], s     step forward to the next event of a kind
  back [kind], b     step backward
  continue, c        run to the next breakpoint or the end
  start | end        jump to the first / last event
  input              show the reconstructed input
  rules              show the rule stack
  tree               show the parse tree and AST
  break line N       break at grammar line N
  break token I      break when token I is consumed
  clear              remove all breakpoints
  status             show session status
  stop | quit        stop the session / leave
Kinds: none, all, or an event kind such as consume_token, location, enter_rule";
