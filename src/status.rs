use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::logging;
use crate::pipeline::ScanResult;
use crate::scheduler::SchedulerState;

/// Most recent error lines shown by `check_status`
pub const MAX_ERROR_LINES: usize = 5;

/// Scheduler liveness, published on every state change and finished cycle
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub state: SchedulerState,
    pub started_at: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_result: Option<ScanResult>,
}

impl Heartbeat {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            state: SchedulerState::Authenticating,
            started_at,
            last_cycle_at: None,
            last_result: None,
        }
    }
}

/// Error lines from the log tail within the lookback window, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTail {
    /// At most [`MAX_ERROR_LINES`], already prefixed for display
    pub lines: Vec<String>,
    /// Every matching line in the window, including those not shown
    pub total: usize,
}

/// Scan log lines (oldest first, as they sit in the file) for ERROR entries
/// newer than `now - window`.
pub fn collect_errors<'a>(
    lines: impl DoubleEndedIterator<Item = &'a str>,
    now: DateTime<Utc>,
    window: Duration,
) -> ErrorTail {
    let cutoff = now - window;
    let mut tail = ErrorTail {
        lines: Vec::new(),
        total: 0,
    };

    for line in lines.rev() {
        let mut fields = line.split_whitespace();
        let (Some(timestamp), Some(level)) = (fields.next(), fields.next()) else {
            continue;
        };
        if level != "ERROR" {
            continue;
        }
        let Ok(logged_at) = DateTime::parse_from_rfc3339(timestamp) else {
            continue;
        };
        if logged_at.with_timezone(&Utc) < cutoff {
            continue;
        }

        tail.total += 1;
        if tail.lines.len() < MAX_ERROR_LINES {
            tail.lines.push(format!("⚠️ {}", line.trim()));
        }
    }
    tail
}

/// Render the liveness line from the latest heartbeat
pub fn liveness_line(heartbeat: &Heartbeat, now: DateTime<Utc>, stale_after: Duration) -> String {
    match heartbeat.last_cycle_at {
        Some(at) if now - at <= stale_after => format!(
            "✅ The scanner is running ({}), last scan finished {} min ago.",
            heartbeat.state,
            (now - at).num_minutes()
        ),
        Some(at) => format!(
            "❌ The scanner has not finished a scan for {} min ({}).",
            (now - at).num_minutes(),
            heartbeat.state
        ),
        None if now - heartbeat.started_at <= stale_after => format!(
            "⏳ The scanner is starting up ({}), no scan has finished yet.",
            heartbeat.state
        ),
        None => format!(
            "❌ The scanner has not finished any scan since startup {} min ago ({}).",
            (now - heartbeat.started_at).num_minutes(),
            heartbeat.state
        ),
    }
}

/// Builds the `check_status` reply: liveness plus the recent error tail
pub struct StatusReporter {
    heartbeat: watch::Receiver<Heartbeat>,
    log_dir: PathBuf,
    window: Duration,
    stale_after: Duration,
}

impl StatusReporter {
    pub fn new(
        heartbeat: watch::Receiver<Heartbeat>,
        log_dir: PathBuf,
        window: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            heartbeat,
            log_dir,
            window,
            stale_after,
        }
    }

    /// Errors from the newest log files, `None` when no log file exists
    async fn recent_errors(&self, now: DateTime<Utc>) -> Result<Option<ErrorTail>> {
        let files = logging::log_files(&self.log_dir).await?;
        if files.is_empty() {
            return Ok(None);
        }

        // The window never spans more than the two most recent daily files
        let mut content = String::new();
        for path in files.iter().take(2).rev() {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read log file: {}", path.display()))?;
            content.push_str(&text);
            if !content.ends_with('\n') {
                content.push('\n');
            }
        }

        Ok(Some(collect_errors(content.lines(), now, self.window)))
    }

    pub async fn report(&self) -> String {
        let now = Utc::now();
        let heartbeat = self.heartbeat.borrow().clone();
        let liveness = liveness_line(&heartbeat, now, self.stale_after);
        let hours = self.window.num_hours();

        let errors = match self.recent_errors(now).await {
            Ok(None) => "❌ Log file not found.".to_string(),
            Ok(Some(tail)) if tail.total == 0 => {
                format!("✅ No errors found in the log in the last {hours} hours.")
            }
            Ok(Some(tail)) => {
                let mut text = format!(
                    "⚠️ Recent errors in the log (showing the latest {} of {}):\n\n{}",
                    tail.lines.len(),
                    tail.total,
                    tail.lines.join("\n")
                );
                if tail.total > tail.lines.len() {
                    text.push_str("\n... (truncated)");
                }
                text
            }
            Err(e) => {
                tracing::warn!("Failed to read recent errors: {:#}", e);
                "❌ Could not read the log file.".to_string()
            }
        };

        format!("{liveness}\n\n{errors}")
    }
}
