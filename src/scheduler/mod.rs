pub mod backoff;
pub mod summary;
pub mod supervisor;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveTime, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::logging;
use crate::pipeline::{Pipeline, ScanResult};
use crate::status::Heartbeat;
use crate::transport::{Forwarder, Session};

use self::backoff::BackoffPolicy;
use self::summary::DailySummary;

pub const STARTUP_MESSAGE: &str = "🚀 The bot is up and running!";

/// Lifecycle of the scan loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Authenticating,
    Running,
    /// Cooling down after a failed cycle; `attempt` counts consecutive failures
    Retreating { attempt: u32 },
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Authenticating => write!(f, "authenticating"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Retreating { attempt } => write!(f, "retreating, attempt {}", attempt),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub retreat: BackoffPolicy,
    pub summary_at: NaiveTime,
    pub log_dir: PathBuf,
    pub log_retention: Duration,
}

/// Drives the ingestion pipeline on a fixed interval
pub struct Scheduler {
    config: SchedulerConfig,
    session: Arc<dyn Session>,
    pipeline: Pipeline,
    forwarder: Arc<dyn Forwarder>,
    summary: DailySummary,
    heartbeat: watch::Sender<Heartbeat>,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        session: Arc<dyn Session>,
        pipeline: Pipeline,
        forwarder: Arc<dyn Forwarder>,
        heartbeat: watch::Sender<Heartbeat>,
    ) -> Self {
        let summary = DailySummary::new(config.summary_at);
        Self {
            config,
            session,
            pipeline,
            forwarder,
            summary,
            heartbeat,
            state: SchedulerState::Authenticating,
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Scheduler state change");
        }
        self.state = next;
        self.heartbeat.send_modify(|hb| hb.state = next);
    }

    /// Authenticate, then scan until `cancel` fires.
    ///
    /// Authentication failure is terminal. Any failed cycle moves to
    /// `Retreating` for the policy delay before the next attempt.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.transition(SchedulerState::Authenticating);
        let auth = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.transition(SchedulerState::Stopped);
                return Ok(());
            }
            auth = self.session.authenticate() => auth,
        };
        if let Err(e) = auth {
            error!("Failed authentication: {}", e);
            self.transition(SchedulerState::Stopped);
            return Err(e).context("Failed to authenticate the reading session");
        }

        self.transition(SchedulerState::Running);
        info!("{}", STARTUP_MESSAGE);
        if let Err(e) = self.forwarder.publish(STARTUP_MESSAGE).await {
            warn!("Failed to announce startup: {:#}", e);
        }

        let mut failures: u32 = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.tick() => outcome,
            };

            let pause = match outcome {
                Ok(()) => {
                    failures = 0;
                    self.transition(SchedulerState::Running);
                    info!("Sleeping for {}s...", self.config.scan_interval.as_secs());
                    self.config.scan_interval
                }
                Err(e) => {
                    let delay = self.config.retreat.delay(failures);
                    error!("Scan loop error: {:#}. Retrying in {}s...", e, delay.as_secs());
                    self.transition(SchedulerState::Retreating { attempt: failures });
                    failures = failures.saturating_add(1);
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
            self.transition(SchedulerState::Running);
        }

        info!("Shutdown requested. Disconnecting session...");
        self.session.disconnect().await;
        self.transition(SchedulerState::Stopped);
        info!("Session disconnected cleanly.");
        Ok(())
    }

    /// One Running step: housekeeping, a scan cycle, the summary check
    async fn tick(&mut self) -> Result<()> {
        match logging::cleanup_stale_logs(
            &self.config.log_dir,
            self.config.log_retention,
            SystemTime::now(),
        )
        .await
        {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} stale log file(s)", removed),
            Err(e) => warn!("Log cleanup failed: {:#}", e),
        }

        let result = self.run_cycle().await?;
        self.summary.record(&result);
        self.heartbeat.send_modify(|hb| {
            hb.last_cycle_at = Some(Utc::now());
            hb.last_result = Some(result);
        });

        let now = Local::now().naive_local();
        if self.summary.is_due(now) {
            let report = self.summary.take_report(now.date());
            match self.forwarder.publish(&report).await {
                Ok(()) => info!("Daily summary sent."),
                Err(e) => error!("Failed to send daily summary: {:#}", e),
            }
        }
        Ok(())
    }

    /// Run the pipeline, turning a panic into an ordinary error
    async fn run_cycle(&self) -> Result<ScanResult> {
        AssertUnwindSafe(self.pipeline.run_cycle())
            .catch_unwind()
            .await
            .map_err(|_| anyhow!("Scan cycle panicked"))?
    }
}
