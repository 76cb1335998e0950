use std::io::{self, IsTerminal};
use std::path::Path;
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug)]
pub enum LoggingError {
    /// The level string is not a valid filter directive.
    InvalidLevel { level: String, reason: String },
}

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLevel { level, reason } => {
                write!(f, "Invalid log level '{}': {}", level, reason)
            }
        }
    }
}

impl std::error::Error for LoggingError {}

/// Where the console copy of the log goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    /// Keeps stdout free for machine-readable output.
    Stderr,
}

impl Console {
    fn writer(self) -> BoxMakeWriter {
        match self {
            Console::Stdout => BoxMakeWriter::new(io::stdout),
            Console::Stderr => BoxMakeWriter::new(io::stderr),
        }
    }

    fn is_terminal(self) -> bool {
        match self {
            Console::Stdout => io::stdout().is_terminal(),
            Console::Stderr => io::stderr().is_terminal(),
        }
    }
}

/// Log sink for one run: timestamped lines on the console and in a file.
///
/// Nothing is installed globally. Wrap the work in [`RunLogger::scope`] and every
/// `tracing` event emitted inside goes to both outputs. Dropping the logger flushes the
/// file writer.
pub struct RunLogger {
    dispatch: Dispatch,
    _guard: WorkerGuard,
}

impl RunLogger {
    /// Logs to `console` and to `dir/file_name`. Colors only when the console is a terminal.
    pub fn new(
        dir: &Path,
        file_name: &str,
        level: &str,
        console: Console,
    ) -> Result<Self, LoggingError> {
        let filter = parse_filter(level)?;

        let file_appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(console.writer())
                    .with_target(false)
                    .with_ansi(console.is_terminal()),
            )
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_target(false)
                    .with_ansi(false),
            )
            .with(filter);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            _guard: guard,
        })
    }

    /// Runs `f` with this logger as the active subscriber.
    pub fn scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

fn parse_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidLevel {
        level: level.to_string(),
        reason: e.to_string(),
    })
}
