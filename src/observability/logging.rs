//! Pipeline loggers.

use std::fmt;
use std::str::FromStr;

use crate::errors::PipelineError;

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    /// Trace level.
    Trace = 0,
    /// Debug level.
    Debug = 1,
    /// Info level.
    #[default]
    Info = 2,
    /// Warning level.
    Warn = 3,
    /// Error level.
    Error = 4,
    /// Off (no logging).
    Off = 5,
}

impl LogLevel {
    /// Returns the upper-case name of the level.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "none" => Ok(LogLevel::Off),
            other => Err(PipelineError::configuration(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

/// Sink for the request/response summaries written by the logging policy.
pub trait Logger: Send + Sync + fmt::Debug {
    /// Returns true if messages at `level` are recorded.
    fn is_enabled(&self, level: LogLevel) -> bool;

    /// Records a message. Callers check [`is_enabled`](Self::is_enabled) first
    /// when building the message is costly.
    fn log(&self, level: LogLevel, message: &str);

    /// Logs at info level.
    fn info(&self, message: &str) {
        if self.is_enabled(LogLevel::Info) {
            self.log(LogLevel::Info, message);
        }
    }

    /// Logs at warning level.
    fn warn(&self, message: &str) {
        if self.is_enabled(LogLevel::Warn) {
            self.log(LogLevel::Warn, message);
        }
    }

    /// Logs at error level.
    fn error(&self, message: &str) {
        if self.is_enabled(LogLevel::Error) {
            self.log(LogLevel::Error, message);
        }
    }
}

/// Forwards messages to `tracing` events.
#[derive(Debug, Clone, Copy)]
pub struct TracingLogger {
    level: LogLevel,
}

impl TracingLogger {
    /// Creates a logger recording `level` and above.
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger for TracingLogger {
    fn is_enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level >= self.level
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(target: "cloud_pipeline::requests", "{}", message),
            LogLevel::Debug => tracing::debug!(target: "cloud_pipeline::requests", "{}", message),
            LogLevel::Info => tracing::info!(target: "cloud_pipeline::requests", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "cloud_pipeline::requests", "{}", message),
            LogLevel::Error => tracing::error!(target: "cloud_pipeline::requests", "{}", message),
            LogLevel::Off => {}
        }
    }
}

/// Writes timestamped lines to stdout, warnings and errors to stderr.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleLogger {
    level: LogLevel,
    timestamps: bool,
}

impl ConsoleLogger {
    /// Creates a logger recording `level` and above.
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            timestamps: true,
        }
    }

    /// Omits timestamps.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    fn format(&self, level: LogLevel, message: &str) -> String {
        if self.timestamps {
            format!("[{}] [{}] {}", chrono::Utc::now().to_rfc3339(), level, message)
        } else {
            format!("[{}] {}", level, message)
        }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger for ConsoleLogger {
    fn is_enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level >= self.level
    }

    fn log(&self, level: LogLevel, message: &str) {
        let line = self.format(level, message);
        match level {
            LogLevel::Warn | LogLevel::Error => eprintln!("{}", line),
            LogLevel::Off => {}
            _ => println!("{}", line),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn is_enabled(&self, _level: LogLevel) -> bool {
        false
    }

    fn log(&self, _level: LogLevel, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Error < LogLevel::Off);
    }

    #[test_case("info", LogLevel::Info)]
    #[test_case(" WARNING ", LogLevel::Warn)]
    #[test_case("Off", LogLevel::Off)]
    fn test_parse_level(input: &str, expected: LogLevel) {
        assert_eq!(input.parse::<LogLevel>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown_level() {
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_enabled_levels() {
        let logger = TracingLogger::new(LogLevel::Warn);
        assert!(!logger.is_enabled(LogLevel::Info));
        assert!(logger.is_enabled(LogLevel::Error));
        assert!(!logger.is_enabled(LogLevel::Off));
        assert!(!NoopLogger.is_enabled(LogLevel::Error));
    }

    #[test]
    fn test_console_format() {
        let logger = ConsoleLogger::new(LogLevel::Info).without_timestamps();
        assert_eq!(
            logger.format(LogLevel::Info, "Response: 200"),
            "[INFO] Response: 200"
        );
        let stamped = ConsoleLogger::default().format(LogLevel::Error, "x");
        assert!(stamped.starts_with('['));
        assert!(stamped.ends_with("[ERROR] x"));
    }
}
