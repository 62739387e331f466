//! Server configuration (`ptymux.toml`).
//!
//! Every knob has a default so the server runs with no file at all. Unknown
//! fields are ignored so configs can carry keys for newer builds. CLI flags
//! override file values in the binary, not here.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// Default terminal geometry.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;
pub const MIN_COLS: u16 = 16;
pub const MAX_COLS: u16 = 1024;
pub const MIN_ROWS: u16 = 8;
pub const MAX_ROWS: u16 = 1024;

/// Default and maximum scrollback capacity orders.
pub const DEFAULT_CAPORDER: u8 = 12;
pub const MAX_CAPORDER: u8 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Scrollback capacity order for new terminals (rows = 1 << n).
    pub caporder: u8,
    /// Default command for new terminals.
    pub command: Vec<String>,
    /// Environment rules: `+KEY=VAL` adds or replaces, `-KEY` removes.
    pub environment: Vec<String>,
    /// Insert a fresh line before a shell prompt that does not start at
    /// column zero.
    pub prompt_newline: bool,
    /// Scroll an open command to the top on clear instead of erasing it.
    pub scroll_clear: bool,
    /// Answerback string sent for ENQ.
    pub answerback: String,
    /// Largest accepted inline-content payload in bytes.
    pub content_limit: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            caporder: DEFAULT_CAPORDER,
            command: vec!["bash".into(), "-l".into()],
            environment: vec!["+TERM=xterm-256color".into()],
            prompt_newline: false,
            scroll_clear: false,
            answerback: String::new(),
            content_limit: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket path; empty selects the per-user runtime default.
    pub listen: String,
    /// Keepalive interval in milliseconds.
    pub keepalive_ms: u32,
    /// Grace period before a terminal whose child exited is closed.
    pub autoclose_ms: u64,
    /// Exit action: `close`, `keep`, or `restart`.
    pub exit_action: String,
    /// Maximum simultaneous client connections.
    pub max_connections: usize,
    /// Attribute scripts run at startup, `KEY=VALUE` per stdout line.
    pub attribute_scripts: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: String::new(),
            keepalive_ms: 25_000,
            autoclose_ms: 1_000,
            exit_action: "close".into(),
            max_connections: 512,
            attribute_scripts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub emulator: EmulatorConfig,
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config.clamped())
    }

    /// Apply range clamps that keep bad configs from wedging the server.
    pub fn clamped(mut self) -> Self {
        if self.emulator.caporder == 0 || self.emulator.caporder > MAX_CAPORDER {
            self.emulator.caporder = DEFAULT_CAPORDER;
        }
        if self.server.keepalive_ms != 0 && self.server.keepalive_ms < 5_000 {
            self.server.keepalive_ms = 5_000;
        }
        if self.emulator.command.is_empty() {
            self.emulator.command = EmulatorConfig::default().command;
        }
        self
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.server.keepalive_ms != 0)
            .then(|| Duration::from_millis(self.server.keepalive_ms as u64))
    }

    pub fn autoclose(&self) -> Duration {
        Duration::from_millis(self.server.autoclose_ms)
    }
}
