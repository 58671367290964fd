mod commands;
mod config;
mod logging;
mod pipeline;
mod platform;
mod scheduler;
mod status;
mod store;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use teloxide::Bot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::platform::journal::TelegramReader;
use crate::platform::long_poll_bot;
use crate::platform::telegram::{self, TelegramForwarder};
use crate::scheduler::backoff::BackoffPolicy;
use crate::scheduler::supervisor::spawn_supervised;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::status::{Heartbeat, StatusReporter};
use crate::store::{KeywordStore, OffsetStore};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to load .env: {e}");
        }
    }

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let _log_guard = logging::init(
        &config.storage.log_dir,
        &config.telegram.log_level.to_ascii_lowercase(),
    )?;

    info!("Configuration loaded from {}", config_path.display());
    info!("  Sources: {:?}", config.telegram.source_channels);
    info!("  Destination: {}", config.telegram.destination_channel);
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);
    info!("  Scan interval: {}s", config.schedule.scan_interval_secs);

    let keywords = KeywordStore::new(&config.storage.keywords_path);
    let initial = keywords
        .load()
        .await
        .context("Failed to initialize keyword list")?;
    info!(
        "Loaded {} keyword(s) from {}",
        initial.len(),
        keywords.path().display()
    );
    let offsets = Arc::new(OffsetStore::new(&config.storage.offsets_path));
    info!("Offsets stored in {}", offsets.path().display());

    let bot = long_poll_bot(&config.telegram.bot_token)?;
    let forwarder = Arc::new(TelegramForwarder::new(
        Bot::clone(&bot),
        config.telegram.destination_channel,
    ));
    let reader = Arc::new(TelegramReader::new(
        config.telegram.reader_token.as_deref(),
        &config.telegram.source_channels,
    )?);

    let pipeline = Pipeline::new(
        config.telegram.source_channels.clone(),
        reader.clone(),
        forwarder.clone(),
        offsets,
        keywords.clone(),
    )
    .with_batch_size(config.schedule.batch_size);

    let (heartbeat_tx, heartbeat_rx) = watch::channel(Heartbeat::new(Utc::now()));
    let stale_after = config.schedule.scan_interval() * 2 + config.schedule.retry_cooldown();
    let reporter = StatusReporter::new(
        heartbeat_rx,
        config.storage.log_dir.clone(),
        chrono::Duration::hours(config.schedule.error_window_hours),
        chrono::Duration::from_std(stale_after).context("Scan interval is too large")?,
    );
    let handler = Arc::new(CommandHandler::new(keywords, reporter));
    let allowed = Arc::new(config.telegram.allowed_user_ids.clone());

    let commands = spawn_supervised(
        "commands",
        BackoffPolicy::fixed(config.schedule.command_restart()),
        move || telegram::run_commands(bot.clone(), handler.clone(), allowed.clone()),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let scheduler = Scheduler::new(
        SchedulerConfig {
            scan_interval: config.schedule.scan_interval(),
            retreat: BackoffPolicy::fixed(config.schedule.retry_cooldown())
                .with_jitter(config.schedule.retry_jitter),
            summary_at: config.schedule.summary_at()?,
            log_dir: config.storage.log_dir.clone(),
            log_retention: config.schedule.log_retention(),
        },
        reader,
        pipeline,
        forwarder,
        heartbeat_tx,
    );

    let result = scheduler.run(cancel).await;
    commands.abort();
    if let Err(e) = &result {
        error!("Scanner stopped: {:#}", e);
    }
    info!("Shutdown complete");
    result
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
    token.cancel();
}
