//! Process configuration.
//!
//! The backend endpoint and API key are read from the environment at startup
//! and are required: a missing `QUICKSYNC_URL` or `QUICKSYNC_ANON_KEY` is
//! fatal. Everything else layers CLI / env values over built-in defaults.

use anyhow::{Context, Result};
use std::path::PathBuf;

const ENV_URL: &str = "QUICKSYNC_URL";
const ENV_ANON_KEY: &str = "QUICKSYNC_ANON_KEY";
const DEFAULT_LOG: &str = "info";

/// Name of the persisted session file under `data_dir`.
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct Config {
    /// Backend base URL (QUICKSYNC_URL env var), e.g. `https://abc.supabase.co`.
    pub backend_url: String,
    /// Public API key for the backend (QUICKSYNC_ANON_KEY env var).
    pub anon_key: String,
    /// Log level filter string, e.g. "debug", "info,quicksync=trace" (default: "info").
    pub log: String,
    /// Write logs to this file path. Required for readable logs while the TUI owns stdout.
    pub log_file: Option<PathBuf>,
    /// Data directory for the persisted session (QUICKSYNC_DATA_DIR env var).
    pub data_dir: PathBuf,
}

impl Config {
    /// Build config from CLI/env args.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. Built-in defaults
    ///
    /// The two backend values have no default and no fallback; absence is a
    /// startup-time error.
    pub fn new(
        log: Option<String>,
        log_file: Option<PathBuf>,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let backend_url = required_env(ENV_URL)?;
        let anon_key = required_env(ENV_ANON_KEY)?;

        Ok(Self {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            anon_key,
            log: log.unwrap_or_else(|| DEFAULT_LOG.to_string()),
            log_file,
            data_dir: data_dir.unwrap_or_else(default_data_dir),
        })
    }

    /// Auth (GoTrue) endpoint for the given path, e.g. `auth_url("otp")`.
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.backend_url)
    }

    /// Data (PostgREST) endpoint for the given table.
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.backend_url)
    }

    /// Realtime WebSocket URL, derived from the backend base URL.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.backend_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.backend_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.backend_url.clone()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.anon_key
        )
    }

    /// Path of the persisted session file.
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{key} must be set (see README for backend setup)"))
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("QUICKSYNC_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/quicksync
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("quicksync");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/quicksync or ~/.local/share/quicksync
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("quicksync");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("quicksync");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\quicksync
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("quicksync");
        }
    }
    // Fallback
    PathBuf::from(".quicksync")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
