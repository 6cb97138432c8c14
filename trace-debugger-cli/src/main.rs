//! Trace Debugger CLI Application
//!
//! This is the command-line front end of the trace debugger. It uses the
//! trace-debugger library and adds:
//! - Configuration from config.toml and command line flags
//! - Console output (text or JSON lines)
//! - Interactive stepping through commands read from stdin

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use trace_debugger::{BreakKind, Recorder, StepOutcome};

mod commands;
mod config;
mod console;

use commands::Command;
use config::{AppConfig, OutputFormat};
use console::ConsoleListener;

/// Trace Debugger - step through the execution of a traced parser
#[derive(Parser, Debug)]
#[command(name = "trace-debugger-cli")]
#[command(about = "Record and step through the execution trace of a remote parser", long_about = None)]
#[command(version)]
struct Args {
    /// Host running the traced parser
    #[arg(short, long)]
    address: Option<String>,

    /// Port of the traced parser
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Break kind of the first step (none, all, or an event kind)
    #[arg(long, value_name = "KIND")]
    break_on: Option<String>,

    /// Grammar line to break at (can be repeated)
    #[arg(long, value_name = "LINE")]
    line_breakpoint: Vec<u32>,

    /// Token index to break at (can be repeated)
    #[arg(long, value_name = "INDEX")]
    token_breakpoint: Vec<i64>,

    /// Output format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Print every received event
    #[arg(long)]
    trace_events: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Trace Debugger CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using debugger library v{}", trace_debugger::VERSION);

    let config = resolve_config(&args)?;
    let break_kind = config.break_kind()?;

    let listener = Arc::new(
        ConsoleListener::new(config.session.format, config.breakpoints.to_set()).with_event_trace(args.trace_events),
    );
    let recorder = Recorder::new(config.debugger_config(), listener.clone());
    recorder.set_break_kind(break_kind);
    recorder
        .connect(&config.connection.address, Some(config.connection.port))
        .with_context(|| format!("Failed to connect to {}:{}", config.connection.address, config.connection.port))?;

    run_console(&recorder, &listener)?;

    recorder.force_stop();
    recorder.join();
    Ok(())
}

/// Configuration file (if any) with command line flags applied on top
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    if let Some(address) = &args.address {
        config.connection.address = address.clone();
    }
    if let Some(port) = args.port {
        config.connection.port = port;
    }
    if let Some(kind) = &args.break_on {
        config.session.break_on = kind.clone();
    }
    if let Some(format) = args.format {
        config.session.format = format;
    }
    config.breakpoints.lines.extend(&args.line_breakpoint);
    config.breakpoints.tokens.extend(&args.token_breakpoint);
    Ok(config)
}

/// Read commands until `quit` or end of input
fn run_console(recorder: &Recorder, listener: &ConsoleListener) -> Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{:#}", e);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        execute(recorder, listener, command);
    }
    Ok(())
}

fn execute(recorder: &Recorder, listener: &ConsoleListener, command: Command) {
    match command {
        Command::Step(kind) => {
            let kind = kind.unwrap_or_else(|| recorder.break_kind());
            report_step(recorder, listener, recorder.step_forward(kind), kind);
        }
        Command::Back(kind) => {
            let kind = kind.unwrap_or_else(|| recorder.break_kind());
            report_step(recorder, listener, recorder.step_backward(kind), kind);
        }
        Command::Continue => {
            let kind = commands::continue_kind();
            report_step(recorder, listener, recorder.step_forward(kind), kind);
        }
        Command::Start => {
            recorder.go_to_start();
            show_position(recorder, listener);
        }
        Command::End => {
            let kind = commands::continue_kind();
            report_step(recorder, listener, recorder.go_to_end(), kind);
        }
        Command::Input => {
            let input = recorder.with_replay(|replay| replay.input());
            let lookahead: String = input.lookahead_tokens().map(|t| t.text.as_str()).collect();
            let text = if lookahead.is_empty() {
                format!("Input: {:?}", input.visible_text())
            } else {
                format!("Input: {:?} (lookahead {:?})", input.visible_text(), lookahead)
            };
            listener.emit("input", &text, json!(input));
        }
        Command::Rules => {
            let rules: Vec<String> = recorder.with_replay(|replay| {
                replay.rule_stack().into_iter().map(str::to_string).collect()
            });
            listener.emit("rules", &format!("Rules: {}", rules.join(" > ")), json!(rules));
        }
        Command::Tree => {
            let (parse_tree, ast) = recorder.with_replay(|replay| {
                let ast: Vec<String> =
                    replay.ast().roots().into_iter().map(|id| replay.ast().to_string_tree(id)).collect();
                (replay.parse_tree().render(), ast)
            });
            listener.emit(
                "tree",
                &format!("Parse tree:\n{}AST: {}", parse_tree, ast.join(" ")),
                json!({ "parse_tree": parse_tree, "ast": ast }),
            );
        }
        Command::BreakLine(line) => {
            listener.add_line(line);
            listener.emit("breakpoint", &format!("Breakpoint at line {}", line), json!({ "line": line }));
        }
        Command::BreakToken(index) => {
            listener.add_token(index);
            listener.emit("breakpoint", &format!("Breakpoint at token {}", index), json!({ "token": index }));
        }
        Command::Clear => {
            listener.clear();
            listener.emit("breakpoint", "Breakpoints cleared", json!(null));
        }
        Command::Status => show_status(recorder, listener),
        Command::Stop => recorder.stop(),
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => {}
    }
}

fn report_step(recorder: &Recorder, listener: &ConsoleListener, outcome: StepOutcome, kind: BreakKind) {
    match outcome {
        // The break callback already printed the position
        StepOutcome::Break(_) => {}
        StepOutcome::Boundary if recorder.status().is_running() => {
            listener.emit("running", &format!("Running until the next {}", kind), json!(kind.to_string()));
        }
        StepOutcome::Boundary => {
            listener.emit("boundary", &format!("No {} in that direction", kind), json!(kind.to_string()));
            show_position(recorder, listener);
        }
    }
}

fn show_position(recorder: &Recorder, listener: &ConsoleListener) {
    match (recorder.position(), recorder.current_event()) {
        (Some(position), Some(event)) => listener.emit(
            "position",
            &format!("At #{}: {}", position, event),
            json!({ "position": position, "event": event }),
        ),
        _ => listener.emit("position", "Nothing recorded yet", json!(null)),
    }
}

fn show_status(recorder: &Recorder, listener: &ConsoleListener) {
    let status = recorder.status();
    let session = recorder.session_info();
    let location = recorder.with_replay(|replay| replay.last_location());
    let exceptions = recorder.with_replay(|replay| replay.exceptions().len());

    let mut text = format!(
        "Status: {} | events: {} | position: {:?} | break on: {}",
        status,
        recorder.event_count(),
        recorder.position(),
        recorder.break_kind()
    );
    if let Some(kind) = recorder.stopped_on() {
        text.push_str(&format!(" | stopped on: {}", kind));
    }
    if let Some((line, column)) = location {
        text.push_str(&format!(" | grammar {}:{}", line, column));
    }
    if exceptions > 0 {
        text.push_str(&format!(" | {} exception(s)", exceptions));
    }
    if let Some(session) = &session {
        text.push_str(&format!(" | {} (protocol {})", session.grammar_file, session.protocol_version));
    }

    listener.emit(
        "status",
        &text,
        json!({
            "status": status.to_string(),
            "events": recorder.event_count(),
            "position": recorder.position(),
            "session": session,
            "location": location,
            "exceptions": exceptions,
        }),
    );
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "trace-debugger-cli",
            "--port",
            "50000",
            "--break-on",
            "location",
            "--line-breakpoint",
            "3",
            "--line-breakpoint",
            "9",
            "--format",
            "json",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.connection.address, "localhost");
        assert_eq!(config.connection.port, 50000);
        assert_eq!(config.session.format, OutputFormat::Json);
        assert_eq!(config.breakpoints.lines, vec![3, 9]);
        assert_eq!(config.break_kind().unwrap().to_string(), "location");
    }
}
