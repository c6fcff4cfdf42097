//! Process log collaborator.
//!
//! The engine and the `log` rule action report progress through an injected
//! [`ProcessLog`]. One instance is built at startup and passed down; nothing
//! in the core reaches for a global logger.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Who produced a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Engine,
    Rule,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine => write!(f, "ENGINE"),
            Self::Rule => write!(f, "RULE"),
        }
    }
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
    Warn,
    Error,
    Success,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Debug => write!(f, "DEBUG"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Success => write!(f, "SUCCESS"),
        }
    }
}

impl LogLevel {
    /// Lenient parse used for rule documents: unknown names fall back to Info.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "success" => Self::Success,
            _ => Self::Info,
        }
    }
}

/// Logging collaborator. Implementations must not fail or panic.
pub trait ProcessLog: Send + Sync {
    fn log(&self, message: &str, source: LogSource, level: LogLevel);
}

/// Forwards process log lines to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingLog;

impl ProcessLog for TracingLog {
    fn log(&self, message: &str, source: LogSource, level: LogLevel) {
        match (source, level) {
            (LogSource::Engine, LogLevel::Debug) => {
                tracing::debug!(target: "stateflow::engine", "{}", message)
            }
            (LogSource::Engine, LogLevel::Warn) => {
                tracing::warn!(target: "stateflow::engine", "{}", message)
            }
            (LogSource::Engine, LogLevel::Error) => {
                tracing::error!(target: "stateflow::engine", "{}", message)
            }
            (LogSource::Engine, LogLevel::Info) => {
                tracing::info!(target: "stateflow::engine", "{}", message)
            }
            (LogSource::Engine, LogLevel::Success) => {
                tracing::info!(target: "stateflow::engine", outcome = "success", "{}", message)
            }
            (LogSource::Rule, LogLevel::Debug) => {
                tracing::debug!(target: "stateflow::rule", "{}", message)
            }
            (LogSource::Rule, LogLevel::Warn) => {
                tracing::warn!(target: "stateflow::rule", "{}", message)
            }
            (LogSource::Rule, LogLevel::Error) => {
                tracing::error!(target: "stateflow::rule", "{}", message)
            }
            (LogSource::Rule, LogLevel::Info) => {
                tracing::info!(target: "stateflow::rule", "{}", message)
            }
            (LogSource::Rule, LogLevel::Success) => {
                tracing::info!(target: "stateflow::rule", outcome = "success", "{}", message)
            }
        }
    }
}

/// Keeps every formatted line in memory and forwards it to an inner log.
///
/// Lines have the form `[timestamp] [SOURCE] [LEVEL] message`. The buffer can
/// be written to a file at the end of a run, including a failed one.
pub struct BufferedLog {
    inner: Arc<dyn ProcessLog>,
    lines: Mutex<Vec<String>>,
}

impl BufferedLog {
    /// Create a buffered log forwarding to `inner`.
    pub fn new(inner: Arc<dyn ProcessLog>) -> Self {
        Self {
            inner,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the buffered lines.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Write the buffered lines to `path`, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut contents = self.lines().join("\n");
        contents.push('\n');
        tokio::fs::write(path, contents).await
    }
}

impl Default for BufferedLog {
    fn default() -> Self {
        Self::new(Arc::new(TracingLog))
    }
}

impl ProcessLog for BufferedLog {
    fn log(&self, message: &str, source: LogSource, level: LogLevel) {
        let line = format!(
            "[{}] [{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            source,
            level,
            message
        );

        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }

        self.inner.log(message, source, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse_lenient() {
        assert_eq!(LogLevel::parse_lenient("Debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse_lenient("WARN"), LogLevel::Warn);
        assert_eq!(LogLevel::parse_lenient("success"), LogLevel::Success);
        assert_eq!(LogLevel::parse_lenient("verbose"), LogLevel::Info);
    }

    #[test]
    fn test_buffered_log_formats_lines() {
        let log = BufferedLog::default();
        log.log("Rule passed", LogSource::Rule, LogLevel::Success);

        let lines = log.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("[RULE] [SUCCESS] Rule passed"));
    }

    #[tokio::test]
    async fn test_buffered_log_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.log");

        let log = BufferedLog::default();
        log.log("first", LogSource::Engine, LogLevel::Info);
        log.log("second", LogSource::Engine, LogLevel::Warn);
        log.save(&path).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[ENGINE] [INFO] first"));
        assert!(contents.contains("[ENGINE] [WARN] second"));
    }
}
