//! Live debugging sessions
//!
//! A [`Recorder`] connects to the traced process, records every event it sends
//! into the [`EventLog`] and pauses the remote parser whenever the step engine
//! breaks. The consumer talks to the recorder from its own thread: it steps
//! through what has been recorded so far, resumes the traced process, and stops
//! the session.
//!
//! Events are received on a dedicated thread. Log, cursor and step engine sit
//! behind one lock; the replayed state sits behind a second one. Listener
//! callbacks are never invoked while either lock is held, so a listener may call
//! back into the recorder.

use crate::config::DebuggerConfig;
use crate::connection::{connect_with_retry, CancelToken, ConnectionOutcome, Connector, TcpConnector};
use crate::event_log::EventLog;
use crate::lookahead::ReconstructedInput;
use crate::protocol::{EventSource, EventStream, SessionInfo, ShutdownHandle};
use crate::replay::Replayer;
use crate::step::{BreakKind, BreakpointSet, Direction, RecorderStatus, StepEngine, StepOutcome};
use crate::types::{DebuggerError, Event, EventKind, Result};
use parking_lot::{Condvar, Mutex};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Receives notifications from a recorder
///
/// Callbacks arrive on the receiver thread for live events and on the calling
/// thread for consumer commands, always in event order. Every method has an
/// empty default.
pub trait DebuggerListener: Send + Sync {
    /// Breakpoints currently set; queried at the start of a session and on every step
    fn breakpoints(&self) -> BreakpointSet {
        BreakpointSet::new()
    }

    fn on_event_appended(&self, _event: &Event, _position: usize) {}

    /// The session paused on `event`
    fn on_break(&self, _event: &Event, _position: usize) {}

    /// The first connection attempt failed; more will follow
    fn on_connecting(&self) {}

    fn on_connection_result(&self, _outcome: ConnectionOutcome) {}

    /// The cursor moved; `prefix` holds the events up to and including it
    fn on_position_changed(&self, _position: Option<usize>, _prefix: &[Event]) {}

    fn on_reconstructed_input(&self, _input: &ReconstructedInput) {}

    fn on_status_changed(&self, _status: RecorderStatus) {}

    /// The session ended
    fn on_stopped(&self) {}

    /// A live event could not be processed or the connection broke
    fn on_error(&self, _error: &DebuggerError) {}
}

/// Listener that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullListener;

impl DebuggerListener for NullListener {}

#[derive(Default)]
struct SessionState {
    log: EventLog,
    engine: StepEngine,
    connecting: bool,
    cancel: Option<CancelToken>,
    receiving: bool,
    stop_requested: bool,
    received_terminate: bool,
    stop_reported: bool,
    /// Bumped by every command that releases a paused receiver
    resume_seq: u64,
    session: Option<SessionInfo>,
    shutdown: Option<ShutdownHandle>,
    peer: Option<String>,
}

impl SessionState {
    /// Prepare for a new session; break kind and status survive
    fn begin_session(&mut self, breakpoints: BreakpointSet, peer: String) {
        self.log.reset();
        self.engine.set_breakpoints(breakpoints);
        self.receiving = true;
        self.stop_requested = false;
        self.received_terminate = false;
        self.stop_reported = false;
        self.session = None;
        self.peer = Some(peer);
    }

    fn transition(&mut self, status: RecorderStatus, changes: &mut Vec<RecorderStatus>) {
        if self.engine.set_status(status) {
            changes.push(status);
        }
    }

    /// Enter `Stopped`; true if the stop still has to be reported
    ///
    /// `disconnect` tears the socket down, which also unblocks a receiver
    /// waiting for the traced process.
    fn complete_stop(&mut self, disconnect: bool, changes: &mut Vec<RecorderStatus>) -> bool {
        self.transition(RecorderStatus::Stopped, changes);
        if disconnect {
            if let Some(handle) = self.shutdown.take() {
                handle.shutdown();
            }
        }
        !std::mem::replace(&mut self.stop_reported, true)
    }

    fn stop_completed(&self) -> bool {
        self.stop_requested && self.engine.status() == RecorderStatus::Stopped
    }
}

struct Shared {
    state: Mutex<SessionState>,
    /// Signalled whenever `resume_seq` or `stop_requested` changes
    resume: Condvar,
    /// Lock order: `replayer` before `state`
    replayer: Mutex<Replayer>,
    listener: Arc<dyn DebuggerListener>,
    connector: Box<dyn Connector>,
    config: DebuggerConfig,
}

impl Shared {
    fn report(&self, changes: Vec<RecorderStatus>, stopped: bool) {
        for status in changes {
            self.listener.on_status_changed(status);
        }
        if stopped {
            log::info!("Debugging session stopped");
            self.listener.on_stopped();
        }
    }

    fn notify_position(&self, position: Option<usize>, prefix: &[Event], input: &ReconstructedInput) {
        self.listener.on_position_changed(position, prefix);
        self.listener.on_reconstructed_input(input);
    }
}

/// Records a live session and steps through it
pub struct Recorder {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Create a recorder that connects over TCP
    pub fn new(config: DebuggerConfig, listener: Arc<dyn DebuggerListener>) -> Self {
        Self::with_connector(config, listener, TcpConnector)
    }

    /// Create a recorder with a custom connector
    pub fn with_connector(
        config: DebuggerConfig,
        listener: Arc<dyn DebuggerListener>,
        connector: impl Connector + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::default()),
                resume: Condvar::new(),
                replayer: Mutex::new(Replayer::new()),
                listener,
                connector: Box::new(connector),
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DebuggerConfig {
        &self.shared.config
    }

    /// Start connecting in the background
    ///
    /// The outcome is reported through `on_connection_result`. On success the
    /// same background thread goes on to receive events. `port` falls back to
    /// the configured default port.
    pub fn connect(&self, address: &str, port: Option<u16>) -> Result<()> {
        let port = port.unwrap_or(self.shared.config.default_port);
        let cancel = {
            let mut state = self.shared.state.lock();
            self.check_idle(&state)?;
            let cancel = CancelToken::new();
            state.connecting = true;
            state.cancel = Some(cancel.clone());
            cancel
        };

        log::info!("Connecting to traced process at {}:{}", address, port);
        let shared = Arc::clone(&self.shared);
        let address = address.to_string();
        self.spawn(move || run_connection(&shared, &address, port, &cancel))
            .map_err(|e| {
                let mut state = self.shared.state.lock();
                state.connecting = false;
                state.cancel = None;
                e
            })
    }

    /// Start a session on an already connected event source
    pub fn attach(&self, source: Box<dyn EventSource>, peer: &str) -> Result<()> {
        let breakpoints = self.shared.listener.breakpoints();
        let mut changes = Vec::new();
        {
            let mut state = self.shared.state.lock();
            self.check_idle(&state)?;
            state.begin_session(breakpoints, peer.to_string());
            state.transition(RecorderStatus::Launching, &mut changes);
        }
        self.shared.replayer.lock().reset();
        self.shared.report(changes, false);

        let shared = Arc::clone(&self.shared);
        let mut source = source;
        self.spawn(move || receive(&shared, source.as_mut())).map_err(|e| {
            self.shared.state.lock().receiving = false;
            e
        })
    }

    fn check_idle(&self, state: &SessionState) -> Result<()> {
        if state.connecting {
            return Err(DebuggerError::ConnectInFlight);
        }
        if state.receiving {
            return Err(DebuggerError::AlreadyConnected(state.peer.clone().unwrap_or_default()));
        }
        Ok(())
    }

    fn spawn(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new().name("trace-receiver".to_string()).spawn(work)?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Abort a connection attempt that is still retrying
    pub fn cancel_connect(&self) {
        if let Some(cancel) = &self.shared.state.lock().cancel {
            log::debug!("Cancelling connection attempt");
            cancel.cancel();
        }
    }

    /// Step forward to the next event matching `kind`
    ///
    /// When no recorded event matches, a paused traced process is resumed and
    /// incoming events are checked against `kind` as they arrive.
    pub fn step_forward(&self, kind: BreakKind) -> StepOutcome {
        self.step(kind, Direction::Forward)
    }

    /// Step backward to the previous event matching `kind`
    pub fn step_backward(&self, kind: BreakKind) -> StepOutcome {
        self.step(kind, Direction::Backward)
    }

    fn step(&self, kind: BreakKind, direction: Direction) -> StepOutcome {
        let breakpoints = self.shared.listener.breakpoints();
        let mut changes = Vec::new();

        // Holding the replayer keeps a resumed receiver from replaying ahead of this step
        let mut replayer = self.shared.replayer.lock();
        let (outcome, moved, position, prefix, stopped_at, resume) = {
            let mut state = self.shared.state.lock();
            let before = state.log.cursor();
            let status_before = state.engine.status();

            let SessionState { log, engine, .. } = &mut *state;
            engine.continue_with(kind, breakpoints);
            let outcome = engine.step_move(log, direction);

            // A paused receiver is released only after this step's callbacks went out
            let mut resume = false;
            if !outcome.is_break() {
                match direction {
                    Direction::Forward => resume = status_before == RecorderStatus::Break,
                    // Nothing was resumed, so the session stays paused
                    Direction::Backward if status_before == RecorderStatus::Break => {
                        state.engine.set_status(RecorderStatus::Break);
                    }
                    Direction::Backward => {}
                }
            }
            if state.engine.status() != status_before {
                changes.push(state.engine.status());
            }

            let position = state.log.cursor();
            let stopped_at = match outcome {
                StepOutcome::Break(index) => state.log.get(index).cloned(),
                StepOutcome::Boundary => None,
            };
            (outcome, position != before, position, state.log.prefix_snapshot(), stopped_at, resume)
        };
        log::debug!("Step {:?} with {} to {:?}: {:?}", direction, kind, position, outcome);

        let input = if moved || outcome.is_break() {
            replayer.play_prefix(&prefix, direction == Direction::Backward);
            Some(replayer.input())
        } else {
            None
        };
        drop(replayer);

        self.shared.report(changes, false);
        if let Some(input) = input {
            self.shared.notify_position(position, &prefix, &input);
        }
        if let (StepOutcome::Break(index), Some(event)) = (outcome, stopped_at) {
            self.shared.listener.on_break(&event, index);
        }
        if resume {
            self.shared.state.lock().resume_seq += 1;
            self.shared.resume.notify_all();
        }
        outcome
    }

    /// Move to the first event and replay from scratch
    pub fn go_to_start(&self) {
        let mut replayer = self.shared.replayer.lock();
        let (position, prefix) = {
            let mut state = self.shared.state.lock();
            if state.log.is_empty() {
                return;
            }
            state.log.set_cursor(Some(0));
            (state.log.cursor(), state.log.prefix_snapshot())
        };
        replayer.play_prefix(&prefix, true);
        let input = replayer.input();
        drop(replayer);
        self.shared.notify_position(position, &prefix, &input);
    }

    /// Run to the terminate event
    pub fn go_to_end(&self) -> StepOutcome {
        self.step_forward(BreakKind::Event(EventKind::Terminate))
    }

    /// Stop the session
    ///
    /// Completes at once if the traced process already terminated or nothing is
    /// being received; otherwise the session keeps running without breaks until
    /// the traced process terminates. Safe to call in any state, any number of
    /// times.
    pub fn stop(&self) {
        let mut changes = Vec::new();
        let stopped = {
            let mut state = self.shared.state.lock();
            if let Some(cancel) = &state.cancel {
                cancel.cancel();
            }
            state.stop_requested = true;
            let stopped = if state.received_terminate || !state.receiving {
                state.complete_stop(true, &mut changes) && state.receiving
            } else {
                state.transition(RecorderStatus::Stopping, &mut changes);
                false
            };
            self.shared.resume.notify_all();
            stopped
        };
        self.shared.report(changes, stopped);
    }

    /// Stop without waiting for the traced process to terminate
    pub fn force_stop(&self) {
        let mut changes = Vec::new();
        let stopped = {
            let mut state = self.shared.state.lock();
            if let Some(cancel) = &state.cancel {
                cancel.cancel();
            }
            state.stop_requested = true;
            let stopped = state.complete_stop(true, &mut changes) && state.receiving;
            self.shared.resume.notify_all();
            stopped
        };
        self.shared.report(changes, stopped);
    }

    /// Drop the recording of a finished session
    pub fn reset(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            self.check_idle(&state)?;
            state.log.reset();
            state.session = None;
        }
        self.shared.replayer.lock().reset();
        Ok(())
    }

    /// Wait for the receiver thread to finish
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Receiver thread panicked");
            }
        }
    }

    pub fn status(&self) -> RecorderStatus {
        self.shared.state.lock().engine.status()
    }

    pub fn is_connecting(&self) -> bool {
        self.shared.state.lock().connecting
    }

    pub fn position(&self) -> Option<usize> {
        self.shared.state.lock().log.cursor()
    }

    pub fn is_at_start(&self) -> bool {
        self.shared.state.lock().log.is_at_start()
    }

    pub fn is_at_end(&self) -> bool {
        self.shared.state.lock().log.is_at_end()
    }

    pub fn current_event(&self) -> Option<Event> {
        self.shared.state.lock().log.current().cloned()
    }

    pub fn event_count(&self) -> usize {
        self.shared.state.lock().log.len()
    }

    pub fn prefix_snapshot(&self) -> Vec<Event> {
        self.shared.state.lock().log.prefix_snapshot()
    }

    /// Every recorded event, regardless of the cursor
    pub fn events(&self) -> Vec<Event> {
        self.shared.state.lock().log.iter().cloned().collect()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.state.lock().session.clone()
    }

    /// Kind of the event behind the latest break
    pub fn stopped_on(&self) -> Option<EventKind> {
        self.shared.state.lock().engine.stopped_on()
    }

    /// Break kind applied to incoming events
    pub fn break_kind(&self) -> BreakKind {
        self.shared.state.lock().engine.break_kind()
    }

    /// Change the break kind without stepping
    pub fn set_break_kind(&self, kind: BreakKind) {
        self.shared.state.lock().engine.set_break_kind(kind);
    }

    /// Inspect the replayed state at the cursor
    pub fn with_replay<T>(&self, f: impl FnOnce(&Replayer) -> T) -> T {
        f(&self.shared.replayer.lock())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let state = self.shared.state.lock();
        let active = state.receiving || state.connecting;
        drop(state);
        if active {
            self.force_stop();
        }
    }
}

fn run_connection(shared: &Shared, address: &str, port: u16, cancel: &CancelToken) {
    let listener = Arc::clone(&shared.listener);
    let result = connect_with_retry(shared.connector.as_ref(), address, port, &shared.config, cancel, || {
        listener.on_connecting()
    });

    let stream = match result {
        Ok(stream) if cancel.is_cancelled() => {
            drop(stream);
            Err(ConnectionOutcome::Cancelled)
        }
        other => other,
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(outcome) => {
            {
                let mut state = shared.state.lock();
                state.connecting = false;
                state.cancel = None;
            }
            shared.listener.on_connection_result(outcome);
            return;
        }
    };

    let peer = format!("{}:{}", address, port);
    let source = ShutdownHandle::new(&stream).and_then(|handle| Ok((handle, EventStream::from_tcp(stream)?)));
    let (handle, mut source) = match source {
        Ok(parts) => parts,
        Err(e) => {
            {
                let mut state = shared.state.lock();
                state.connecting = false;
                state.cancel = None;
            }
            log::error!("Could not set up the connection to {}: {}", peer, e);
            shared.listener.on_error(&e);
            shared.listener.on_connection_result(ConnectionOutcome::Failed);
            return;
        }
    };

    let breakpoints = shared.listener.breakpoints();
    let mut changes = Vec::new();
    {
        let mut state = shared.state.lock();
        state.connecting = false;
        state.cancel = None;
        state.begin_session(breakpoints, peer);
        state.shutdown = Some(handle);
        state.transition(RecorderStatus::Launching, &mut changes);
    }
    shared.replayer.lock().reset();
    shared.report(changes, false);
    shared.listener.on_connection_result(ConnectionOutcome::Success);

    receive(shared, &mut source);
}

/// Receiver loop; runs until the stream ends or the session is stopped
fn receive(shared: &Shared, source: &mut dyn EventSource) {
    if let Err(e) = run_receiver(shared, source) {
        if shared.state.lock().stop_requested {
            log::debug!("Receiver ended after stop: {}", e);
        } else {
            log::error!("Lost the traced process: {}", e);
            shared.listener.on_error(&e);
        }
    }
    finish(shared);
}

fn run_receiver(shared: &Shared, source: &mut dyn EventSource) -> Result<()> {
    let info = source.handshake()?;
    shared.state.lock().session = Some(info);

    // Commence is synthesized and never acknowledged
    process(shared, Event::Commence);

    while let Some(event) = source.next_event()? {
        let terminate = matches!(event, Event::Terminate);
        process(shared, event);
        source.ack()?;
        if terminate || shared.state.lock().stop_completed() {
            break;
        }
    }
    Ok(())
}

/// Record one live event, pausing if it breaks
fn process(shared: &Shared, event: Event) {
    log::trace!("Received {}", event);
    let mut changes = Vec::new();
    let (position, breaks, stopped, seen) = {
        let mut state = shared.state.lock();
        state.log.append(event.clone());
        let position = state.log.len() - 1;

        if state.engine.status() == RecorderStatus::Launching {
            state.transition(RecorderStatus::Running, &mut changes);
        }
        if matches!(event, Event::Terminate) {
            state.received_terminate = true;
        }

        let mut breaks = false;
        let mut stopped = false;
        if state.stop_requested {
            if state.received_terminate && state.engine.status() == RecorderStatus::Stopping {
                // The terminate still gets its ack before the receiver exits
                stopped = state.complete_stop(false, &mut changes);
            }
        } else if state.engine.status().is_running() {
            let status_before = state.engine.status();
            breaks = match event {
                Event::Commence if shared.config.break_on_commence => {
                    state.engine.force_break(&event);
                    true
                }
                _ => state.engine.check_break(&event),
            };
            if state.engine.status() != status_before {
                changes.push(state.engine.status());
            }
        }
        (position, breaks, stopped, state.resume_seq)
    };

    shared.report(changes, false);
    shared.listener.on_event_appended(&event, position);

    let show_position = breaks || matches!(event, Event::Terminate);
    let (outcome, shown) = {
        let mut replayer = shared.replayer.lock();
        let outcome = if replayer.played() == position {
            replayer.play_event(&event)
        } else {
            let prefix = shared.state.lock().log.snapshot_through(position);
            replayer.play_prefix(&prefix, false);
            Ok(())
        };
        let shown = if show_position {
            let state = shared.state.lock();
            Some((state.log.cursor(), state.log.prefix_snapshot(), replayer.input()))
        } else {
            None
        };
        (outcome, shown)
    };
    if let Err(e) = outcome {
        log::warn!("Event #{} ({}) did not replay: {}", position, event, e);
        shared.listener.on_error(&e);
    }
    if let Some((cursor, prefix, input)) = shown {
        shared.notify_position(cursor, &prefix, &input);
    }
    shared.report(Vec::new(), stopped);

    if breaks {
        log::debug!("Live break on #{}: {}", position, event);
        shared.listener.on_break(&event, position);
        wait_for_resume(shared, seen);
    }
}

/// Block the receiver until a step resumes it or the session stops
fn wait_for_resume(shared: &Shared, seen: u64) {
    let mut state = shared.state.lock();
    while state.resume_seq == seen && !state.stop_requested {
        shared.resume.wait(&mut state);
    }
}

fn finish(shared: &Shared) {
    let mut changes = Vec::new();
    let stopped = {
        let mut state = shared.state.lock();
        let stopped = state.complete_stop(true, &mut changes);
        state.receiving = false;
        state.peer = None;
        stopped
    };
    shared.report(changes, stopped);
}

/// Open a plain event stream on an accepted or connected socket
pub fn stream_from_tcp(stream: TcpStream) -> Result<Box<dyn EventSource>> {
    Ok(Box::new(EventStream::from_tcp(stream)?))
}
