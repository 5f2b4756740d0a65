//! Process logging bootstrap.
//!
//! # Responsibility
//! - Start `flexi_logger` once per process, writing rolling files when a log
//!   directory is configured and stderr otherwise.
//! - Record panics as `event=panic_captured` lines.
//!
//! # Invariants
//! - Repeating `init_logging` with the same level and target is a no-op.
//! - A second call with another level or target is rejected, never applied.
//! - Initialization never panics.
//! - Log lines carry metadata only; secret values are never logged.

use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "birthday";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_LOG_FILES: usize = 5;
const PANIC_SUMMARY_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Rolling files in an absolute directory, warnings mirrored to stderr.
    Directory(PathBuf),
}

impl LogTarget {
    fn parse(log_dir: Option<&str>) -> Result<Self, String> {
        let Some(raw) = log_dir else {
            return Ok(Self::Stderr);
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("log_dir cannot be empty".to_string());
        }
        let path = Path::new(trimmed);
        if !path.is_absolute() {
            return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
        }
        Ok(Self::Directory(path.to_path_buf()))
    }

    fn directory(&self) -> Option<&Path> {
        match self {
            Self::Stderr => None,
            Self::Directory(dir) => Some(dir),
        }
    }
}

impl Display for LogTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stderr => f.write_str("stderr"),
            Self::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}

struct ActiveLogger {
    level: LevelFilter,
    target: LogTarget,
    _handle: LoggerHandle,
}

/// Starts logging at `level` (`trace|debug|info|warn|error`).
///
/// `log_dir` selects rolling files under that absolute directory; `None`
/// logs to stderr.
///
/// # Errors
/// Returns a readable message when the level or directory is invalid, when
/// logging is already active with different settings, or when the backend
/// fails to start.
pub fn init_logging(level: &str, log_dir: Option<&str>) -> Result<(), String> {
    let level = parse_level(level)?;
    let target = LogTarget::parse(log_dir)?;

    let active = ACTIVE.get_or_try_init(|| start(level, &target))?;
    if active.target != target {
        return Err(format!(
            "logging already initialized at `{}`; refusing to switch to `{}`",
            active.target, target
        ));
    }
    if active.level != level {
        return Err(format!(
            "logging already initialized with level `{}`; refusing to switch to `{}`",
            active.level, level
        ));
    }
    Ok(())
}

/// Returns `(level, target)` once logging is active.
pub fn logging_status() -> Option<(LevelFilter, LogTarget)> {
    ACTIVE
        .get()
        .map(|active| (active.level, active.target.clone()))
}

/// `debug` for debug builds, `info` for release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start(level: LevelFilter, target: &LogTarget) -> Result<ActiveLogger, String> {
    let spec = level.as_str().to_ascii_lowercase();
    let logger =
        Logger::try_with_str(&spec).map_err(|err| format!("invalid log level `{spec}`: {err}"))?;

    let started = match target.directory() {
        None => logger
            .log_to_stderr()
            .format_for_stderr(flexi_logger::detailed_format)
            .start(),
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                format!("failed to create log directory `{}`: {err}", dir.display())
            })?;
            logger
                .log_to_file(FileSpec::default().directory(dir).basename(LOG_FILE_BASENAME))
                .rotate(
                    Criterion::Size(ROTATE_AT_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(KEEP_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
                .duplicate_to_stderr(Duplicate::Warn)
                .format_for_stderr(flexi_logger::default_format)
                .start()
        }
    };
    let handle = started.map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook();
    info!(
        "event=app_start module=core status=ok platform={} debug_build={} version={}",
        std::env::consts::OS,
        cfg!(debug_assertions),
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "event=core_init module=core status=ok level={} target={}",
        spec, target
    );

    Ok(ActiveLogger {
        level,
        target: target.clone(),
        _handle: handle,
    })
}

fn parse_level(level: &str) -> Result<LevelFilter, String> {
    let normalized = level.trim().to_ascii_lowercase();
    let candidate = if normalized == "warning" { "warn" } else { normalized.as_str() };
    match candidate.parse::<LevelFilter>() {
        Ok(LevelFilter::Off) | Err(_) => Err(format!(
            "unsupported log level `{normalized}`; expected trace|debug|info|warn|error"
        )),
        Ok(filter) => Ok(filter),
    }
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic_captured module=core status=error location={} payload={}",
            location,
            one_line(&payload, PANIC_SUMMARY_CHARS)
        );
        previous(info);
    }));
}

// Payloads may quote spreadsheet names; keep them short and on one line.
fn one_line(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    let mut summary = flattened.chars().take(max_chars).collect::<String>();
    if flattened.chars().count() > max_chars {
        summary.push_str("...");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::{init_logging, logging_status, one_line, parse_level, LogTarget};
    use log::LevelFilter;

    #[test]
    fn levels_are_case_insensitive_and_accept_warning() {
        assert_eq!(parse_level(" INFO ").unwrap(), LevelFilter::Info);
        assert_eq!(parse_level("warning").unwrap(), LevelFilter::Warn);
        assert!(parse_level("off").is_err());
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn relative_log_dir_is_rejected() {
        let error = LogTarget::parse(Some("logs/dev")).expect_err("relative paths must fail");
        assert!(error.contains("absolute"));
        assert_eq!(LogTarget::parse(None).unwrap(), LogTarget::Stderr);
    }

    #[test]
    fn one_line_flattens_and_truncates() {
        let summary = one_line("line1\nline2\rline3", 8);
        assert!(!summary.contains('\n'));
        assert!(!summary.contains('\r'));
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn init_logging_is_idempotent_and_rejects_conflicts() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let dir_str = dir.path().to_str().expect("temp dir should be UTF-8").to_string();

        init_logging("info", Some(&dir_str)).expect("first init should succeed");
        init_logging("INFO", Some(&dir_str)).expect("same settings should be a no-op");

        let level_error = init_logging("debug", Some(&dir_str)).expect_err("level conflict");
        assert!(level_error.contains("refusing to switch"));
        let target_error = init_logging("info", None).expect_err("target conflict");
        assert!(target_error.contains("refusing to switch"));

        let (level, target) = logging_status().expect("logging should be active");
        assert_eq!(level, LevelFilter::Info);
        assert_eq!(target, LogTarget::Directory(dir.path().to_path_buf()));
    }
}
