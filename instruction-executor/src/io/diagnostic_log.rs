//! Append-only diagnostic log (`[timestamp] [level] message` per line).
//!
//! The log is purely observational: the server never reads it back, and a
//! failed write is reported through tracing and otherwise ignored so it can
//! never break the protocol loop.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    /// Designed fallbacks, e.g. the idle-timeout auto-answer.
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLog {
    path: Option<PathBuf>,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A log that drops every entry.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Error, message.as_ref());
    }

    /// Fire-and-forget append.
    pub fn append(&self, level: LogLevel, message: &str) {
        if let Err(err) = self.try_append(level, message) {
            warn!(err = %format!("{err:#}"), "diagnostic log write failed");
        }
    }

    pub fn try_append(&self, level: LogLevel, message: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;
        let line = format_entry(&timestamp(), level, message);
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))
    }

    /// Empty the log file (used by `clear_cache`).
    pub fn truncate(&self) {
        if let Err(err) = self.try_truncate() {
            warn!(err = %format!("{err:#}"), "diagnostic log truncate failed");
        }
    }

    pub fn try_truncate(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        fs::write(path, "").with_context(|| format!("truncate {}", path.display()))
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One log line. Embedded newlines are escaped to keep one entry per line.
pub fn format_entry(timestamp: &str, level: LogLevel, message: &str) -> String {
    let message = message.replace('\r', "\\r").replace('\n', "\\n");
    format!("[{timestamp}] [{}] {message}\n", level.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_format_is_stable() {
        assert_eq!(
            format_entry("2025-01-02 03:04:05", LogLevel::Warn, "idle timeout"),
            "[2025-01-02 03:04:05] [WARN] idle timeout\n"
        );
    }

    #[test]
    fn entry_escapes_newlines() {
        let line = format_entry("t", LogLevel::Info, "a\nb");
        assert_eq!(line, "[t] [INFO] a\\nb\n");
    }

    #[test]
    fn append_then_truncate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs").join("execution.log");
        let log = DiagnosticLog::new(&path);

        log.info("first");
        log.error("second");
        let contents = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] first"));
        assert!(lines[1].ends_with("[ERROR] second"));

        log.truncate();
        assert_eq!(fs::read_to_string(&path).expect("read"), "");
    }

    #[test]
    fn write_failure_is_swallowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A directory cannot be opened for appending.
        let log = DiagnosticLog::new(temp.path());
        assert!(log.try_append(LogLevel::Info, "x").is_err());
        log.info("does not panic");
    }

    #[test]
    fn disabled_log_is_noop() {
        let log = DiagnosticLog::disabled();
        assert!(log.try_append(LogLevel::Info, "x").is_ok());
        assert!(log.try_truncate().is_ok());
        assert_eq!(log.path(), None);
    }
}
