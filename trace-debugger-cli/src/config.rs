//! Configuration loading and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use trace_debugger::{BreakKind, BreakpointSet, DebuggerConfig, DEFAULT_PORT};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub breakpoints: BreakpointsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_retries() -> u32 {
    12
}

fn default_retry_delay() -> u64 {
    500
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BreakpointsConfig {
    /// Grammar lines
    #[serde(default)]
    pub lines: Vec<u32>,
    /// Token indices
    #[serde(default)]
    pub tokens: Vec<i64>,
}

impl BreakpointsConfig {
    pub fn to_set(&self) -> BreakpointSet {
        let mut set = BreakpointSet::new();
        for &line in &self.lines {
            set.add_line(line);
        }
        for &token in &self.tokens {
            set.add_token(token);
        }
        set
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Break kind of the first step (`none`, `all` or an event kind)
    #[serde(default = "default_break_on")]
    pub break_on: String,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_true")]
    pub break_on_commence: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            break_on: default_break_on(),
            format: OutputFormat::default(),
            break_on_commence: true,
        }
    }
}

fn default_break_on() -> String {
    "consume_token".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    /// Library configuration for the recorder
    pub fn debugger_config(&self) -> DebuggerConfig {
        DebuggerConfig::new()
            .with_max_retries(self.connection.max_retries)
            .with_retry_delay(std::time::Duration::from_millis(self.connection.retry_delay_ms))
            .with_break_on_commence(self.session.break_on_commence)
            .with_default_port(self.connection.port)
    }

    pub fn break_kind(&self) -> Result<BreakKind> {
        self.session
            .break_on
            .parse()
            .with_context(|| format!("Invalid break kind in [session]: {:?}", self.session.break_on))
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config.break_kind()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use trace_debugger::EventKind;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [connection]
            address = "10.0.0.5"
            port = 49153

            [breakpoints]
            lines = [12, 40]
            tokens = [7]

            [session]
            break_on = "location"
            format = "json"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.connection.address, "10.0.0.5");
        assert_eq!(config.connection.max_retries, 12);
        assert_eq!(config.session.format, OutputFormat::Json);
        assert_eq!(config.break_kind().unwrap(), BreakKind::Event(EventKind::Location));

        let set = config.breakpoints.to_set();
        assert!(set.has_line(40));
        assert!(set.has_token(7));
        assert_eq!(config.debugger_config().default_port, 49153);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.connection.port, DEFAULT_PORT);
        assert_eq!(config.session.format, OutputFormat::Text);
        assert!(config.breakpoints.to_set().is_empty());
        assert_eq!(config.debugger_config(), DebuggerConfig::new());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nretry_delay_ms = 50\n\n[session]\nbreak_on = \"all\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.connection.retry_delay_ms, 50);
        assert_eq!(config.break_kind().unwrap(), BreakKind::All);
    }

    #[test]
    fn test_load_config_rejects_unknown_break_kind() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nbreak_on = \"lunch\"").unwrap();
        assert!(load_config(file.path()).is_err());
        assert!(load_config(Path::new("/nonexistent/config.toml")).is_err());
    }
}
