//! Process logging bootstrap.
//!
//! # Responsibility
//! - Start one rolling file logger per process for engine events.
//! - Capture panics as sanitized log events.
//!
//! # Invariants
//! - Initialization never panics.
//! - Repeating initialization with identical settings is a no-op.
//! - Initialization with different settings is rejected.
//! - Engine events carry metadata only, never bound values or entity data.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "repokit";
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

/// File logger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory for `repokit*.log` files.
    pub directory: PathBuf,
    pub max_file_bytes: u64,
    pub max_files: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            directory: PathBuf::new(),
            max_file_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

impl LogSettings {
    pub fn new(level: impl Into<String>, directory: impl AsRef<Path>) -> Self {
        Self {
            level: level.into(),
            directory: directory.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    UnsupportedLevel(String),
    InvalidDirectory(String),
    /// Logging already runs with other settings.
    Conflict { active: String, requested: String },
    Backend(String),
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::InvalidDirectory(message) => write!(f, "invalid log directory: {message}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging already initialized with {active}; refusing to switch to {requested}"
            ),
            Self::Backend(message) => write!(f, "logger backend failed: {message}"),
        }
    }
}

impl Error for LoggingError {}

struct ActiveLogger {
    level: &'static str,
    directory: PathBuf,
    _handle: LoggerHandle,
}

impl ActiveLogger {
    fn describe(&self) -> String {
        format!("level `{}` at `{}`", self.level, self.directory.display())
    }

    fn check(&self, level: &'static str, directory: &Path) -> Result<(), LoggingError> {
        if self.level == level && self.directory == directory {
            return Ok(());
        }
        Err(LoggingError::Conflict {
            active: self.describe(),
            requested: format!("level `{level}` at `{}`", directory.display()),
        })
    }
}

/// Starts the rolling file logger described by `settings`.
///
/// # Errors
/// - `UnsupportedLevel`, `InvalidDirectory` for bad settings.
/// - `Conflict` when logging already runs with other settings.
/// - `Backend` when the logger cannot start.
pub fn init_logging(settings: &LogSettings) -> Result<(), LoggingError> {
    let level = normalize_level(&settings.level)?;
    let directory = normalize_directory(&settings.directory)?;

    if let Some(active) = ACTIVE.get() {
        return active.check(level, &directory);
    }

    let active = ACTIVE.get_or_try_init(|| start_logger(level, &directory, settings))?;
    active.check(level, &directory)
}

fn start_logger(
    level: &'static str,
    directory: &Path,
    settings: &LogSettings,
) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(directory).map_err(|err| {
        LoggingError::InvalidDirectory(format!("cannot create `{}`: {err}", directory.display()))
    })?;

    let handle = Logger::try_with_str(level)
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(directory)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(settings.max_file_bytes.max(1)),
            Naming::Numbers,
            Cleanup::KeepLogFiles(settings.max_files.max(1)),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        // [YYYY-MM-DD HH:MM:SS.ffffff TZ] LEVEL [module] file:line: message
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook_once();
    info!(
        "event=logging_start module=logging status=ok level={} log_dir={} version={}",
        level,
        directory.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        level,
        directory: directory.to_path_buf(),
        _handle: handle,
    })
}

/// `(level, directory)` of the running logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.level, active.directory.clone()))
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}

fn normalize_directory(directory: &Path) -> Result<PathBuf, LoggingError> {
    if directory.as_os_str().is_empty() {
        return Err(LoggingError::InvalidDirectory("path is empty".to_string()));
    }
    if !directory.is_absolute() {
        return Err(LoggingError::InvalidDirectory(format!(
            "`{}` is not absolute",
            directory.display()
        )));
    }
    Ok(directory.to_path_buf())
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        // Payloads may quote entity data; keep them short and single-line.
        let payload = panic_payload_summary(panic_info);
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location, payload
        );
        previous_hook(panic_info);
    }));
}

fn panic_payload_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };
    sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
}

fn sanitize_message(value: &str, max_chars: usize) -> String {
    let single_line = value.replace(['\n', '\r'], " ");
    let mut truncated: String = single_line.chars().take(max_chars).collect();
    if single_line.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::{
        init_logging, logging_status, normalize_directory, normalize_level, sanitize_message,
        LogSettings, LoggingError,
    };
    use std::path::Path;

    #[test]
    fn normalize_level_accepts_aliases() {
        assert_eq!(normalize_level(" WARNING ").unwrap(), "warn");
        assert!(matches!(
            normalize_level("loud"),
            Err(LoggingError::UnsupportedLevel(_))
        ));
    }

    #[test]
    fn normalize_directory_requires_absolute_path() {
        assert!(matches!(
            normalize_directory(Path::new("logs/dev")),
            Err(LoggingError::InvalidDirectory(_))
        ));
        assert!(matches!(
            normalize_directory(Path::new("")),
            Err(LoggingError::InvalidDirectory(_))
        ));
    }

    #[test]
    fn sanitize_message_is_single_line_and_bounded() {
        let sanitized = sanitize_message("line1\nline2\rline3", 8);
        assert_eq!(sanitized, "line1 li...");
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: LogSettings =
            serde_json::from_str(r#"{ "level": "warn", "directory": "/var/log/app" }"#).unwrap();
        assert_eq!(settings.level, "warn");
        assert_eq!(settings.max_files, 5);
        assert!(serde_json::from_str::<LogSettings>(r#"{ "colour": true }"#).is_err());
    }

    #[test]
    fn init_is_idempotent_and_rejects_conflicts() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let settings = LogSettings::new("info", first.path());

        init_logging(&settings).expect("first init");
        init_logging(&settings).expect("same settings are a no-op");

        assert!(matches!(
            init_logging(&LogSettings::new("debug", first.path())),
            Err(LoggingError::Conflict { .. })
        ));
        assert!(matches!(
            init_logging(&LogSettings::new("info", second.path())),
            Err(LoggingError::Conflict { .. })
        ));

        let (level, directory) = logging_status().expect("logging is active");
        assert_eq!(level, "info");
        assert_eq!(directory, first.path());
    }
}
