// End-to-end sessions against an in-process traced parser
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use trace_debugger::protocol::encode_event;
use trace_debugger::{
    BreakKind, BreakpointSet, ConnectionOutcome, Connector, DebuggerConfig, DebuggerError, DebuggerListener, Event,
    EventKind, Recorder, RecorderStatus, StepOutcome, Token,
};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Accept one debugger connection and play `events` to it, waiting for each ack
fn spawn_traced_parser(events: Vec<Event>) -> (u16, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        writeln!(writer, "ANTLR 2").unwrap();
        writeln!(writer, "grammar \"Expr.g").unwrap();

        let mut acks = 0;
        for event in &events {
            let Some(line) = encode_event(event) else { continue };
            if writeln!(writer, "{}", line).is_err() {
                break;
            }
            let mut ack = String::new();
            match reader.read_line(&mut ack) {
                Ok(n) if n > 0 && ack.trim_end() == "ack" => acks += 1,
                _ => break,
            }
        }
        acks
    });
    (port, handle)
}

struct Harness {
    breakpoints: BreakpointSet,
    breaks: Mutex<Sender<(usize, EventKind)>>,
    results: Mutex<Sender<ConnectionOutcome>>,
    connecting: AtomicUsize,
    stopped: AtomicUsize,
}

struct Channels {
    breaks: Receiver<(usize, EventKind)>,
    results: Receiver<ConnectionOutcome>,
}

fn harness(breakpoints: BreakpointSet) -> (Arc<Harness>, Channels) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (break_tx, breaks) = mpsc::channel();
    let (result_tx, results) = mpsc::channel();
    let harness = Harness {
        breakpoints,
        breaks: Mutex::new(break_tx),
        results: Mutex::new(result_tx),
        connecting: AtomicUsize::new(0),
        stopped: AtomicUsize::new(0),
    };
    (Arc::new(harness), Channels { breaks, results })
}

impl DebuggerListener for Harness {
    fn breakpoints(&self) -> BreakpointSet {
        self.breakpoints.clone()
    }

    fn on_break(&self, event: &Event, position: usize) {
        let _ = self.breaks.lock().send((position, event.kind()));
    }

    fn on_connecting(&self) {
        self.connecting.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_result(&self, outcome: ConnectionOutcome) {
        let _ = self.results.lock().send(outcome);
    }

    fn on_stopped(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

fn tok(index: i64, text: &str, line: u32) -> Token {
    Token::new(index, 4, text).with_position(line, 0)
}

fn trace() -> Vec<Event> {
    vec![
        Event::Commence,
        Event::enter_rule("prog"),
        Event::Location { line: 1, column: 0 },
        Event::consume(tok(0, "a", 1)),
        Event::Location { line: 2, column: 0 },
        Event::consume(tok(1, " ", 1).with_channel(99)),
        Event::consume(tok(2, "b", 1)),
        Event::exit_rule("prog"),
        Event::Terminate,
    ]
}

#[test]
fn test_live_session_steps_through_the_traced_parser() {
    let (port, parser) = spawn_traced_parser(trace());
    let (listener, channels) = harness(BreakpointSet::new());
    let recorder = Recorder::new(DebuggerConfig::new(), listener.clone());
    recorder.connect("127.0.0.1", Some(port)).unwrap();

    assert_eq!(channels.results.recv_timeout(TIMEOUT).unwrap(), ConnectionOutcome::Success);
    assert_eq!(listener.connecting.load(Ordering::SeqCst), 0);
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (0, EventKind::Commence));
    assert_eq!(recorder.session_info().unwrap().grammar_file, "Expr.g");

    recorder.step_forward(BreakKind::Event(EventKind::Location));
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (2, EventKind::Location));

    recorder.step_forward(BreakKind::Event(EventKind::ConsumeToken));
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (3, EventKind::ConsumeToken));

    // The off-channel blank is passed over
    recorder.step_forward(BreakKind::Event(EventKind::ConsumeToken));
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (6, EventKind::ConsumeToken));

    assert_eq!(recorder.go_to_end(), StepOutcome::Boundary);
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (8, EventKind::Terminate));
    assert!(recorder.is_at_end());
    recorder.with_replay(|replay| {
        assert_eq!(replay.input().visible_text(), "a b");
        assert!(replay.rule_stack().is_empty());
        assert_eq!(replay.last_location(), Some((2, 0)));
    });

    // Terminate already arrived, so the stop completes at once
    recorder.stop();
    assert_eq!(recorder.status(), RecorderStatus::Stopped);
    recorder.join();
    assert_eq!(listener.stopped.load(Ordering::SeqCst), 1);

    // Every event but the terminate was acknowledged
    assert_eq!(parser.join().unwrap(), 7);
    assert_eq!(recorder.event_count(), 9);
}

#[test]
fn test_stepping_back_after_the_session_ended() {
    let (port, parser) = spawn_traced_parser(trace());
    let (listener, channels) = harness(BreakpointSet::new());
    let config = DebuggerConfig::new().with_break_on_commence(false);
    let recorder = Recorder::new(config, listener.clone());
    recorder.connect("127.0.0.1", Some(port)).unwrap();
    assert_eq!(channels.results.recv_timeout(TIMEOUT).unwrap(), ConnectionOutcome::Success);

    recorder.join();
    assert_eq!(parser.join().unwrap(), 8);
    assert_eq!(recorder.status(), RecorderStatus::Stopped);
    assert!(channels.breaks.try_recv().is_err());

    assert_eq!(recorder.step_backward(BreakKind::Event(EventKind::ConsumeToken)), StepOutcome::Break(6));
    assert_eq!(recorder.step_backward(BreakKind::Event(EventKind::ConsumeToken)), StepOutcome::Break(3));
    recorder.with_replay(|replay| {
        let committed: Vec<i64> = replay.input().committed_tokens().map(|t| t.index).collect();
        assert_eq!(committed, vec![0]);
        assert_eq!(replay.rule_stack(), vec!["prog"]);
    });
    assert_eq!(recorder.step_backward(BreakKind::Event(EventKind::ConsumeToken)), StepOutcome::Boundary);
    assert!(recorder.is_at_start());
    assert_eq!(recorder.status(), RecorderStatus::Stopped);

    recorder.go_to_start();
    assert_eq!(recorder.position(), Some(0));
    recorder.with_replay(|replay| assert_eq!(replay.played(), 1));
}

#[test]
fn test_location_steps_visit_every_location_in_order() {
    let mut events = trace();
    events.splice(
        7..7,
        vec![
            Event::Location { line: 3, column: 2 },
            Event::enter_rule("tail"),
            Event::Location { line: 7, column: 0 },
            Event::exit_rule("tail"),
        ],
    );
    let (port, parser) = spawn_traced_parser(events);
    let (listener, channels) = harness(BreakpointSet::new());
    let config = DebuggerConfig::new().with_break_on_commence(false);
    let recorder = Recorder::new(config, listener);
    recorder.connect("127.0.0.1", Some(port)).unwrap();
    assert_eq!(channels.results.recv_timeout(TIMEOUT).unwrap(), ConnectionOutcome::Success);
    recorder.join();
    assert_eq!(parser.join().unwrap(), 12);

    let expected: Vec<usize> = recorder
        .events()
        .iter()
        .enumerate()
        .filter(|(_, event)| event.kind() == EventKind::Location)
        .map(|(index, _)| index)
        .collect();
    assert_eq!(expected, vec![2, 4, 7, 9]);

    recorder.go_to_start();
    let mut visited = Vec::new();
    for _ in 0..recorder.event_count() {
        if recorder.is_at_end() {
            break;
        }
        if let StepOutcome::Break(position) = recorder.step_forward(BreakKind::Event(EventKind::Location)) {
            visited.push(position);
        }
    }
    assert!(recorder.is_at_end());
    assert_eq!(visited, expected);
}

#[test]
fn test_line_breakpoint_stops_a_run_to_the_end() {
    let (port, parser) = spawn_traced_parser(trace());
    let (listener, channels) = harness(BreakpointSet::new().with_line(2));
    let recorder = Recorder::new(DebuggerConfig::new(), listener);
    recorder.connect("127.0.0.1", Some(port)).unwrap();
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (0, EventKind::Commence));

    recorder.go_to_end();
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (4, EventKind::Location));
    assert_eq!(recorder.stopped_on(), Some(EventKind::Location));

    recorder.go_to_end();
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (8, EventKind::Terminate));
    recorder.force_stop();
    recorder.join();
    assert_eq!(parser.join().unwrap(), 7);
}

#[test]
fn test_stop_while_paused_drains_to_terminate() {
    let (port, parser) = spawn_traced_parser(trace());
    let (listener, channels) = harness(BreakpointSet::new());
    let recorder = Recorder::new(DebuggerConfig::new(), listener.clone());
    recorder.connect("127.0.0.1", Some(port)).unwrap();
    assert_eq!(channels.breaks.recv_timeout(TIMEOUT).unwrap(), (0, EventKind::Commence));

    recorder.stop();
    recorder.stop();
    recorder.join();

    assert_eq!(recorder.status(), RecorderStatus::Stopped);
    assert_eq!(listener.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.event_count(), 9);
    assert_eq!(parser.join().unwrap(), 8);
}

/// Connector that never reaches anything and reports each attempt
struct Unreachable {
    attempts: AtomicUsize,
    reported: Mutex<Sender<usize>>,
}

impl Connector for Unreachable {
    fn connect(&self, _address: &str, _port: u16, _timeout: Duration) -> io::Result<TcpStream> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.reported.lock().send(attempt);
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
    }
}

fn unreachable() -> (Arc<Unreachable>, Receiver<usize>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(Unreachable { attempts: AtomicUsize::new(0), reported: Mutex::new(tx) }), rx)
}

struct Shared(Arc<Unreachable>);

impl Connector for Shared {
    fn connect(&self, address: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
        self.0.connect(address, port, timeout)
    }
}

#[test]
fn test_unreachable_parser_fails_after_twelve_attempts() {
    let (connector, _attempts) = unreachable();
    let (listener, channels) = harness(BreakpointSet::new());
    let config = DebuggerConfig::new().with_retry_delay(Duration::from_millis(20));
    let recorder = Recorder::with_connector(config, listener.clone(), Shared(connector.clone()));

    let started = Instant::now();
    recorder.connect("unreachable.invalid", None).unwrap();
    assert_eq!(channels.results.recv_timeout(TIMEOUT).unwrap(), ConnectionOutcome::Failed);

    assert_eq!(connector.attempts.load(Ordering::SeqCst), 12);
    assert!(started.elapsed() >= Duration::from_millis(11 * 20));
    assert_eq!(listener.connecting.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.status(), RecorderStatus::Stopped);
    recorder.join();
    assert!(!recorder.is_connecting());
}

#[test]
fn test_cancel_after_third_attempt() {
    let (connector, attempts) = unreachable();
    let (listener, channels) = harness(BreakpointSet::new());
    let config = DebuggerConfig::new().with_retry_delay(Duration::from_millis(300));
    let recorder = Recorder::with_connector(config, listener, Shared(connector.clone()));
    recorder.connect("unreachable.invalid", Some(1)).unwrap();

    for expected in 1..=3 {
        assert_eq!(attempts.recv_timeout(TIMEOUT).unwrap(), expected);
    }
    assert!(matches!(recorder.connect("unreachable.invalid", Some(1)), Err(DebuggerError::ConnectInFlight)));
    recorder.cancel_connect();

    assert_eq!(channels.results.recv_timeout(TIMEOUT).unwrap(), ConnectionOutcome::Cancelled);
    recorder.join();
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    assert!(channels.results.try_recv().is_err());
}
