use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix of the daily log files (`filterbot.log.YYYY-MM-DD`)
pub const LOG_FILE_PREFIX: &str = "filterbot.log";

/// Install the global subscriber: coloured stdout plus a plain daily log file.
///
/// `RUST_LOG` wins over `level` when set. Keep the returned guard alive for
/// the whole process, dropping it flushes and stops the file writer.
pub fn init(log_dir: &Path, level: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level: {level}"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Log files in `dir`, newest first (the date suffix sorts lexically)
pub async fn log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read log directory: {}", dir.display()))
        }
    };

    while let Some(entry) = entries.next_entry().await? {
        let is_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        if is_log && entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    files.reverse();
    Ok(files)
}

/// Delete log files last modified at least `retention` before `now`.
/// Returns how many files were removed.
pub async fn cleanup_stale_logs(dir: &Path, retention: Duration, now: SystemTime) -> Result<usize> {
    let mut removed = 0;
    for path in log_files(dir).await? {
        let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Cannot stat log file {}: {}", path.display(), e);
                continue;
            }
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < retention {
            debug!("Keeping log file {} ({}s old)", path.display(), age.as_secs());
            continue;
        }

        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove log file: {}", path.display()))?;
        info!("Old log file removed: {}", path.display());
        removed += 1;
    }
    Ok(removed)
}
