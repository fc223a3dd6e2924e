//! Logging initialization for tidemcp servers and clients
//!
//! Library code only emits `tracing` events. The embedding binary decides
//! where they go by calling [`LoggingConfig::init`] once at startup.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tidemcp_core::LoggingConfig;
//!
//! // Stderr-only (no guard needed)
//! LoggingConfig::stderr_minimal().init()?;
//!
//! // File logging (guard must be held)
//! let _guard = LoggingConfig::file_only("/var/log/tidemcp").init()?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! | Output Target | Guard Required |
//! |---------------|----------------|
//! | `Stderr` | No |
//! | `FileOnly` | **Yes** |
//! | `Both` | **Yes** |
//! | `None` | No |
//!
//! `RUST_LOG`, when set, takes precedence over the configured level.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Where log output goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// Logging disabled
    None,
    /// Standard error only
    #[default]
    Stderr,
    /// Rolling files only
    FileOnly,
    /// Standard error and rolling files
    Both,
}

/// File rotation policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// New file every minute
    Minute,
    /// New file every hour
    Hourly,
    /// New file every day
    Daily,
    /// Single file
    #[default]
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `tidemcp_server=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub structured: bool,
    /// Output target
    pub output: LogOutput,
    /// Directory for file output
    pub directory: Option<PathBuf>,
    /// File name prefix for file output
    pub file_prefix: String,
    /// File rotation policy
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            output: LogOutput::Stderr,
            directory: None,
            file_prefix: "tidemcp".to_string(),
            rotation: LogRotation::Never,
        }
    }
}

/// Guard that flushes buffered file logs on drop
///
/// Hold it for the lifetime of the program when file output is enabled.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    _stderr_guard: Option<WorkerGuard>,
}

impl LoggingConfig {
    /// Errors only, plain text on stderr
    pub fn stderr_minimal() -> Self {
        Self {
            level: "error".to_string(),
            ..Self::default()
        }
    }

    /// Debug level, plain text on stderr
    pub fn stderr_debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Self::default()
        }
    }

    /// Info level into daily files under `dir`
    pub fn file_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            output: LogOutput::FileOnly,
            directory: Some(dir.into()),
            rotation: LogRotation::Daily,
            ..Self::default()
        }
    }

    /// JSON to stderr and hourly files under `dir`
    pub fn production(dir: impl Into<PathBuf>) -> Self {
        Self {
            structured: true,
            output: LogOutput::Both,
            directory: Some(dir.into()),
            rotation: LogRotation::Hourly,
            ..Self::default()
        }
    }

    /// Set the filter level
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Initialize the global subscriber
    ///
    /// Returns `Some(LoggingGuard)` for file-based logging (must be held),
    /// or `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if file output is configured without a directory,
    /// the directory cannot be created, or a global subscriber is already set.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.output {
            LogOutput::None => Ok(None),
            LogOutput::Stderr => {
                self.install(filter, io::stderr)?;
                Ok(None)
            }
            LogOutput::FileOnly => {
                let (writer, file_guard) = tracing_appender::non_blocking(self.appender()?);
                self.install(filter, writer)?;
                Ok(Some(LoggingGuard {
                    _file_guard: file_guard,
                    _stderr_guard: None,
                }))
            }
            LogOutput::Both => {
                let (file_writer, file_guard) = tracing_appender::non_blocking(self.appender()?);
                let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(io::stderr());
                self.install(filter, file_writer.and(stderr_writer))?;
                Ok(Some(LoggingGuard {
                    _file_guard: file_guard,
                    _stderr_guard: Some(stderr_guard),
                }))
            }
        }
    }

    fn appender(&self) -> io::Result<RollingFileAppender> {
        let dir: &Path = self.directory.as_deref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "File logging requires a directory",
            )
        })?;
        std::fs::create_dir_all(dir)?;

        let prefix = &self.file_prefix;
        Ok(match self.rotation {
            LogRotation::Minute => tracing_appender::rolling::minutely(dir, prefix),
            LogRotation::Hourly => tracing_appender::rolling::hourly(dir, prefix),
            LogRotation::Daily => tracing_appender::rolling::daily(dir, prefix),
            LogRotation::Never => tracing_appender::rolling::never(dir, prefix),
        })
    }

    fn install<W>(&self, filter: EnvFilter, writer: W) -> io::Result<()>
    where
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::registry().with(filter);
        let result = if self.structured {
            subscriber
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            subscriber.with(fmt::layer().with_writer(writer)).try_init()
        };
        result.map_err(|e| io::Error::other(e.to_string()))
    }
}
