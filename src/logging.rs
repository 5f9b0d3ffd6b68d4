//! Driver logging
//!
//! Each driver installs one subscriber at startup and keeps a [`LogControl`]
//! so the level can follow `data.loglevel` whenever new options arrive.
//! Output goes to descriptor 3 when the daemon provides one, and to stderr
//! otherwise.

use std::fs::File;
use std::sync::Mutex;

use tracing::{debug, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::clienv;
use crate::error::LoggingError;

pub const DEFAULT_LEVEL: &str = "INFO";

/// Where log lines are written.
#[derive(Debug)]
pub enum LogSink {
    Stderr,
    File(File),
}

impl LogSink {
    /// Uses the configured log descriptor when it is open, stderr otherwise.
    pub fn detect() -> Self {
        match clienv::log_fd() {
            Some(fd) => Self::from_fd(fd),
            None => LogSink::Stderr,
        }
    }

    #[cfg(unix)]
    pub fn from_fd(fd: i32) -> Self {
        use std::os::unix::io::FromRawFd;

        if fd <= 2 {
            return LogSink::Stderr;
        }
        // SAFETY: F_GETFD only queries descriptor flags and touches no memory.
        let open = unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1;
        if !open {
            return LogSink::Stderr;
        }
        // SAFETY: the descriptor is open and reserved for logging; nothing
        // else in this process owns it.
        LogSink::File(unsafe { File::from_raw_fd(fd) })
    }

    #[cfg(not(unix))]
    pub fn from_fd(_fd: i32) -> Self {
        LogSink::Stderr
    }

    fn into_writer(self) -> BoxMakeWriter {
        match self {
            LogSink::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogSink::File(file) => BoxMakeWriter::new(Mutex::new(file)),
        }
    }
}

/// Maps the daemon's level names onto a tracing filter directive.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "INFO" | "NOTICE" => "info",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// Handle for changing the level of an installed subscriber.
#[derive(Clone)]
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
    /// Set when $DRIVERLINK_LOG pinned the level at startup
    pinned: bool,
}

impl LogControl {
    /// Re-creates the level filter. A level pinned by the environment is kept.
    pub fn set_level(&self, level: &str) -> Result<(), LoggingError> {
        if self.pinned {
            debug!(level, "log level pinned by environment, ignoring options");
            return Ok(());
        }
        let directive = level_directive(level);
        self.handle
            .reload(EnvFilter::new(directive))
            .map_err(|e| LoggingError::Reload(e.to_string()))?;
        debug!(level = directive, "log level changed");
        Ok(())
    }
}

/// Installs the global subscriber for a driver process.
pub fn init(name: &str, level: &str, sink: LogSink) -> Result<LogControl, LoggingError> {
    let pinned = clienv::log_override();
    let directive = pinned
        .clone()
        .unwrap_or_else(|| level_directive(level).to_string());

    let (filter, handle) = reload::Layer::new(EnvFilter::new(directive));
    let layer = fmt::layer()
        .with_writer(sink.into_writer())
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    info!(driver = name, "logging initialized");
    Ok(LogControl {
        handle,
        pinned: pinned.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_level_names_map_to_tracing() {
        assert_eq!(level_directive("DEBUG"), "debug");
        assert_eq!(level_directive("notice"), "info");
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("CRITICAL"), "error");
        assert_eq!(level_directive("bogus"), "info");
    }

    #[test]
    fn standard_descriptors_are_never_taken_as_sink() {
        assert!(matches!(LogSink::from_fd(1), LogSink::Stderr));
        assert!(matches!(LogSink::from_fd(2), LogSink::Stderr));
    }

    #[cfg(unix)]
    #[test]
    fn closed_descriptor_falls_back_to_stderr() {
        assert!(matches!(LogSink::from_fd(4000), LogSink::Stderr));
    }
}
