//! Connection management
//!
//! Reaching the traced process is a bounded retry loop: the process is usually
//! started at the same moment as the debugger and needs a moment before its
//! socket accepts connections. The loop sleeps between attempts and can be
//! cancelled at any time by the consumer.

use crate::config::DebuggerConfig;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Opens the TCP link to the traced process
pub trait Connector: Send + Sync {
    /// One connection attempt
    fn connect(&self, address: &str, port: u16, timeout: Duration) -> io::Result<TcpStream>;
}

/// Connector over plain TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, address: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in (address, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{} did not resolve", address))
        }))
    }
}

/// How a connection attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionOutcome {
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for ConnectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionOutcome::Success => f.write_str("connected"),
            ConnectionOutcome::Failed => f.write_str("failed"),
            ConnectionOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Cancellation flag that also wakes a sleeping retry loop
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wakeup) = &*self.inner;
        *flag.lock() = true;
        wakeup.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `duration` or until cancelled; returns true if cancelled
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (flag, wakeup) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if wakeup.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// Try to reach `address:port` until it answers, the retries run out or `cancel` fires
///
/// `on_first_failure` runs once, after the first failed attempt, so that a quick
/// connection never shows a progress indicator.
pub fn connect_with_retry(
    connector: &dyn Connector,
    address: &str,
    port: u16,
    config: &DebuggerConfig,
    cancel: &CancelToken,
    mut on_first_failure: impl FnMut(),
) -> Result<TcpStream, ConnectionOutcome> {
    for attempt in 1..=config.max_retries {
        if cancel.is_cancelled() {
            log::info!("Connection to {}:{} cancelled before attempt {}", address, port, attempt);
            return Err(ConnectionOutcome::Cancelled);
        }

        match connector.connect(address, port, config.connect_timeout()) {
            Ok(stream) => {
                log::info!("Connected to {}:{} on attempt {}", address, port, attempt);
                return Ok(stream);
            }
            Err(e) => {
                log::debug!("Attempt {}/{} to {}:{} failed: {}", attempt, config.max_retries, address, port, e);
            }
        }

        if attempt == 1 {
            on_first_failure();
        }
        if attempt < config.max_retries && cancel.wait_timeout(config.retry_delay()) {
            log::info!("Connection to {}:{} cancelled after attempt {}", address, port, attempt);
            return Err(ConnectionOutcome::Cancelled);
        }
    }

    log::warn!("Giving up on {}:{} after {} attempts", address, port, config.max_retries);
    Err(ConnectionOutcome::Failed)
}
