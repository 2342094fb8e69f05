//! Log level configuration.
//!
//! `LOG_LEVEL` accepts `trace`, `debug`, `info`, `warn` or `error` in any case.
//! Anything else falls back to [`LogLevel::Info`] with an error logged, so a
//! typo never keeps the forwarder from starting.

use std::str::FromStr;

/// Verbosity of the forwarder's own logs, most severe first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl LogLevel {
    /// Directive string for `tracing_subscriber::EnvFilter`.
    ///
    /// Transport crates are silenced so that a `debug` level shows the
    /// pipeline, not every TLS record.
    #[must_use]
    pub fn env_filter_directives(self) -> String {
        format!(
            "h2=off,hyper=off,rustls=off,{}",
            self.as_ref().to_lowercase()
        )
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}
