use std::{
    fs::{self, DirEntry},
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result, ensure};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, RollingFileAppender},
};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};
use uuid::Uuid;

use crate::config::{LoggingConfig, LoggingRotation};

const LOG_FILE_PREFIX: &str = "abstractor.log";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Keeps the non-blocking writer alive; dropping it flushes pending log lines.
pub struct LoggingGuard {
    _worker_guard: WorkerGuard,
    run_id: String,
}

impl LoggingGuard {
    /// Run id stamped on the `logging_initialized` line and reused for the batch.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

#[derive(Debug, Default)]
struct RetentionReport {
    removed: usize,
    warnings: Vec<String>,
}

/// Installs JSON file logging (rolled by `logging.rotation`) plus an optional stderr layer
/// for warnings, after sweeping log files older than `logging.retention_days`.
pub fn init_tracing(config: &LoggingConfig) -> Result<LoggingGuard> {
    ensure!(
        !config.filter.trim().is_empty(),
        "logging.filter cannot be empty"
    );
    ensure!(
        !config.dir.as_os_str().is_empty(),
        "logging.dir cannot be empty"
    );

    let log_dir = absolute_log_dir(&config.dir)?;
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create logging directory {}", log_dir.display()))?;
    let retention = purge_expired_logs_at(
        &log_dir,
        LOG_FILE_PREFIX,
        config.retention_days,
        SystemTime::now(),
    );

    let (writer, worker_guard) = tracing_appender::non_blocking(rolling_appender(
        &log_dir,
        &config.rotation,
    ));
    let file_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(parse_filter(&config.filter)?);
    let stderr_layer = config.stderr_warn_enabled.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_filter(LevelFilter::WARN)
    });

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    let run_id = Uuid::now_v7().to_string();
    tracing::info!(
        target: "logging",
        run_id = %run_id,
        dir = %log_dir.display(),
        filter = %config.filter,
        rotation = ?config.rotation,
        retention_days = config.retention_days,
        expired_files_removed = retention.removed,
        "logging_initialized"
    );
    for warning in &retention.warnings {
        tracing::warn!(target: "logging", warning = %warning, "logging_retention_warning");
    }

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
        run_id,
    })
}

fn parse_filter(filter: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(filter).with_context(|| format!("failed to parse logging.filter '{filter}'"))
}

fn rolling_appender(log_dir: &Path, rotation: &LoggingRotation) -> RollingFileAppender {
    match rotation {
        LoggingRotation::Daily => rolling::daily(log_dir, LOG_FILE_PREFIX),
        LoggingRotation::Hourly => rolling::hourly(log_dir, LOG_FILE_PREFIX),
    }
}

fn absolute_log_dir(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .context("failed to read current working directory for logging.dir resolution")?;
    Ok(cwd.join(dir))
}

/// Modification time of a regular file named `prefix*`; `None` for anything else.
fn rolled_log_mtime(entry: &DirEntry, prefix: &str) -> io::Result<Option<SystemTime>> {
    if !entry.file_name().to_string_lossy().starts_with(prefix) {
        return Ok(None);
    }
    let metadata = entry.metadata()?;
    if !metadata.is_file() {
        return Ok(None);
    }
    metadata.modified().map(Some)
}

/// Removes `prefix*` files last modified at or before `now - retention_days`.
fn purge_expired_logs_at(
    log_dir: &Path,
    prefix: &str,
    retention_days: usize,
    now: SystemTime,
) -> RetentionReport {
    let max_age = Duration::from_secs((retention_days as u64).saturating_mul(SECS_PER_DAY));
    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut report = RetentionReport::default();

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(err) => {
            let dir = log_dir.display();
            report
                .warnings
                .push(format!("failed to scan logging directory {dir}: {err}"));
            return report;
        }
    };

    for entry in entries {
        let outcome = entry.and_then(|entry| match rolled_log_mtime(&entry, prefix)? {
            Some(modified) if modified <= cutoff => fs::remove_file(entry.path()).map(|()| true),
            _ => Ok(false),
        });
        match outcome {
            Ok(true) => report.removed += 1,
            Ok(false) => {}
            Err(err) => report
                .warnings
                .push(format!("failed to expire log file in {}: {err}", log_dir.display())),
        }
    }

    report
}
