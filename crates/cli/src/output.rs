// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use std::io::{self, IsTerminal, Write};

use fieldsync_client::config::ConfigError;
use fieldsync_client::{ErrorCategory, SessionError, StoreError};
use fieldsync_common::path::PathError;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::exit_code::ConnectFailed;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    /// One JSON object per line.
    Json,
}

impl OutputFormat {
    /// JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Print a command result: `human` renders it for a terminal.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Human => writeln!(out, "{}", human(value)),
        OutputFormat::Json => {
            serde_json::to_writer(&mut out, value).map_err(io::Error::other)?;
            writeln!(out)
        }
    }
}

pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    report(format, Severity::Warning, code, message);
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    report(format, Severity::Error, code, &message);
}

// ── stderr ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Error => ANSI_RED,
            Self::Warning => ANSI_YELLOW,
        }
    }
}

fn report(format: OutputFormat, severity: Severity, code: &str, message: &str) {
    let line = stderr_line(format, severity, code, message, io::stderr().is_terminal());
    let _ = writeln!(io::stderr().lock(), "{line}");
}

fn stderr_line(
    format: OutputFormat,
    severity: Severity,
    code: &str,
    message: &str,
    is_tty: bool,
) -> String {
    let label = severity.label();
    match format {
        OutputFormat::Json => {
            let mut line = Map::new();
            line.insert(label.into(), json!({ "code": code, "message": message }));
            Value::Object(line).to_string()
        }
        OutputFormat::Human if is_tty => {
            format!("{}{label}:{ANSI_RESET} {message}", severity.color())
        }
        OutputFormat::Human => format!("{label}: {message}"),
    }
}

/// Error code plus a message with a hint on what to try next.
fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");

    for cause in error.chain() {
        if let Some(ConnectFailed(category)) = cause.downcast_ref::<ConnectFailed>() {
            return match category {
                ErrorCategory::PermissionDenied => (
                    "PERMISSION_DENIED",
                    format!("{message}. Check the token passed with --token or FIELDSYNC_TOKEN"),
                ),
                ErrorCategory::HandshakeFailed => (
                    "HANDSHAKE_FAILED",
                    format!("{message}. Check the server URL, or retry with --transport poll"),
                ),
                ErrorCategory::ServerRestarting => {
                    ("SERVER_RESTARTING", format!("{message}. Try again in a moment"))
                }
                ErrorCategory::ConnectionLost => ("CONNECTION_LOST", message),
                ErrorCategory::Generic => ("CONNECTION_ERROR", message),
            };
        }
        if cause.is::<ConfigError>() {
            return (
                "CONFIG_INVALID",
                format!("{message}. Set --server or server_url in ~/.fieldsync/config.toml"),
            );
        }
        if cause.is::<PathError>() {
            return ("INVALID_PATH", format!("{message}. Paths look like findings.[0].title"));
        }
        let read_only = matches!(cause.downcast_ref::<StoreError>(), Some(StoreError::ReadOnly))
            || matches!(
                cause.downcast_ref::<SessionError>(),
                Some(SessionError::Store(StoreError::ReadOnly))
            );
        if read_only {
            return ("READ_ONLY", format!("{message}. Ask for write access to this document"));
        }
    }
    ("ERROR", message)
}
