//! Structured logging setup using tracing.
//!
//! Hosts call [`init`] once at startup and keep the returned guard alive.
//! Two optional outputs are composed on one registry:
//! - console, human-readable, overridable through `RUST_LOG`
//! - rolling JSON file, written from a background thread

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

const CRATE_TARGET: &str = "tubesync_core";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How log lines are printed to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleFormat {
    /// Timestamp, level, target and fields.
    #[default]
    Full,
    /// Level and message only.
    Compact,
    /// No console output.
    Off,
}

/// Log rotation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// New file every hour.
    Hourly,
    /// New file every day.
    Daily,
    /// Single file.
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

/// JSON file output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogging {
    /// Directory log files are written to.
    pub directory: PathBuf,
    /// File name prefix, e.g. `tubesync` -> `tubesync.2025-01-15`.
    pub prefix: String,
    /// Rotation frequency.
    pub rotation: LogRotation,
    /// Most verbose level written for this crate.
    pub level: Level,
}

impl FileLogging {
    /// Daily-rotated debug log in `directory`.
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "tubesync".to_string(),
            rotation: LogRotation::Daily,
            level: Level::DEBUG,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Most verbose console level for this crate.
    pub level: Level,
    /// Most verbose level for every other crate (HTTP client, runtime).
    pub dependency_level: Level,
    /// Console output style.
    pub console: ConsoleFormat,
    /// File output, if any.
    pub file: Option<FileLogging>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LoggingConfig {
    /// Verbose console and an hourly trace file.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            dependency_level: Level::INFO,
            console: ConsoleFormat::Full,
            file: Some(FileLogging {
                rotation: LogRotation::Hourly,
                level: Level::TRACE,
                ..FileLogging::in_directory(default_log_directory())
            }),
        }
    }

    /// Compact info console and a daily debug file.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            dependency_level: Level::WARN,
            console: ConsoleFormat::Compact,
            file: Some(FileLogging::in_directory(default_log_directory())),
        }
    }

    /// Console only, for tools and tests.
    pub fn console_only(level: Level) -> Self {
        Self {
            level,
            dependency_level: Level::WARN,
            console: ConsoleFormat::Full,
            file: None,
        }
    }

    /// Production settings with log files under the app's data directory.
    pub fn for_app(config: &AppConfig) -> Self {
        Self::production().with_file(Some(FileLogging::in_directory(
            config.data_directory.join("logs"),
        )))
    }

    /// Set this crate's console level.
    #[must_use]
    pub const fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the console style.
    #[must_use]
    pub const fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.console = console;
        self
    }

    /// Replace the file output.
    #[must_use]
    pub fn with_file(mut self, file: Option<FileLogging>) -> Self {
        self.file = file;
        self
    }

    fn console_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directives(self.level, self.dependency_level)))
    }
}

/// Keeps the background file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
    file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl LoggingGuard {
    /// Whether a file output was installed.
    pub const fn has_file_output(&self) -> bool {
        self.file_guard.is_some()
    }
}

/// Install the global subscriber described by `config`.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    match config.console {
        ConsoleFormat::Full => layers.push(
            fmt::layer()
                .with_target(true)
                .with_filter(config.console_filter())
                .boxed(),
        ),
        ConsoleFormat::Compact => layers.push(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_filter(config.console_filter())
                .boxed(),
        ),
        ConsoleFormat::Off => {}
    }

    let mut file_guard = None;
    if let Some(file) = &config.file {
        std::fs::create_dir_all(&file.directory).map_err(|e| {
            LoggingError::DirectoryCreationFailed {
                path: file.directory.clone(),
                reason: e.to_string(),
            }
        })?;

        let appender =
            RollingFileAppender::new(file.rotation.into(), &file.directory, &file.prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(EnvFilter::new(directives(
                    file.level,
                    config.dependency_level,
                )))
                .boxed(),
        );
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard {
        file_guard,
    })
}

/// Platform log directory used by the presets.
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tubesync")
        .join("logs")
}

/// Filter directives: `crate_level` for this crate, `dependency_level`
/// for everything else.
fn directives(crate_level: Level, dependency_level: Level) -> String {
    format!(
        "{},{CRATE_TARGET}={}",
        level_name(dependency_level),
        level_name(crate_level)
    )
}

const fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// Directory path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// A global subscriber was already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
