//! Debugger configuration types
//!
//! This module defines the knobs of a debugging session: how hard the connection
//! manager tries to reach the traced process and how the live session behaves once
//! events start flowing. Breakpoints are not configuration; the consumer supplies
//! them on every step.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Port the traced process listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 49100;

/// Configuration for a debugging session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebuggerConfig {
    /// Number of connection attempts before giving up (default: 12)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between two connection attempts in milliseconds (default: 500ms)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Timeout of a single TCP connection attempt in milliseconds (default: 1000ms)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Pause the live session on the commence event
    #[serde(default = "default_true")]
    pub break_on_commence: bool,

    /// Port used when the consumer does not name one
    #[serde(default = "default_port")]
    pub default_port: u16,
}

fn default_max_retries() -> u32 {
    12
}

fn default_retry_delay() -> u64 {
    500
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            connect_timeout_ms: default_connect_timeout(),
            break_on_commence: true,
            default_port: DEFAULT_PORT,
        }
    }
}

impl DebuggerConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the number of connection attempts
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder method: set the delay between connection attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Builder method: set the timeout of a single connection attempt
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method: pause (or not) on the commence event
    pub fn with_break_on_commence(mut self, enabled: bool) -> Self {
        self.break_on_commence = enabled;
        self
    }

    /// Builder method: set the default port
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Delay between connection attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Timeout of a single connection attempt
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DebuggerConfig::new();
        assert_eq!(config.max_retries, 12);
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
        assert!(config.break_on_commence);
        assert_eq!(config.default_port, 49100);
    }

    #[test]
    fn test_builder() {
        let config = DebuggerConfig::new()
            .with_max_retries(3)
            .with_retry_delay(Duration::from_millis(20))
            .with_connect_timeout(Duration::from_millis(50))
            .with_break_on_commence(false)
            .with_default_port(1234);

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 20);
        assert_eq!(config.connect_timeout_ms, 50);
        assert!(!config.break_on_commence);
        assert_eq!(config.default_port, 1234);
    }
}
