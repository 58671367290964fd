use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::ChannelId;

/// Bot credentials and channel wiring, read from the environment
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub reader_token: Option<String>,
    pub source_channels: Vec<ChannelId>,
    pub destination_channel: ChannelId,
    /// Empty means every user may issue commands
    pub allowed_user_ids: Vec<u64>,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_offsets_path")]
    pub offsets_path: PathBuf,
    #[serde(default = "default_keywords_path")]
    pub keywords_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
    /// Fraction of the cooldown added as random jitter, 0.0 to 1.0
    #[serde(default)]
    pub retry_jitter: f64,
    #[serde(default = "default_command_restart_secs")]
    pub command_restart_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Local time of the daily summary, `HH:MM`
    #[serde(default = "default_summary_time")]
    pub summary_time: String,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u64,
    #[serde(default = "default_error_window_hours")]
    pub error_window_hours: i64,
}

/// The TOML part of the configuration
#[derive(Debug, Deserialize, Clone, Default)]
struct Settings {
    #[serde(default)]
    storage: Option<StorageConfig>,
    #[serde(default)]
    schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
}

fn default_offsets_path() -> PathBuf {
    PathBuf::from("config/offset.json")
}

fn default_keywords_path() -> PathBuf {
    PathBuf::from("config/keywords.txt")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("output/log")
}

fn default_scan_interval_secs() -> u64 {
    300
}

fn default_retry_cooldown_secs() -> u64 {
    60
}

fn default_command_restart_secs() -> u64 {
    300
}

fn default_batch_size() -> usize {
    crate::pipeline::BATCH_SIZE
}

fn default_summary_time() -> String {
    "01:00".to_string()
}

fn default_log_retention_days() -> u64 {
    2
}

fn default_error_window_hours() -> i64 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            offsets_path: default_offsets_path(),
            keywords_path: default_keywords_path(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            retry_cooldown_secs: default_retry_cooldown_secs(),
            retry_jitter: 0.0,
            command_restart_secs: default_command_restart_secs(),
            batch_size: default_batch_size(),
            summary_time: default_summary_time(),
            log_retention_days: default_log_retention_days(),
            error_window_hours: default_error_window_hours(),
        }
    }
}

impl ScheduleConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }

    pub fn command_restart(&self) -> Duration {
        Duration::from_secs(self.command_restart_secs)
    }

    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(self.log_retention_days * 24 * 3600)
    }

    pub fn summary_at(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.summary_time.trim(), "%H:%M").with_context(|| {
            format!(
                "Invalid schedule.summary_time '{}', expected HH:MM",
                self.summary_time
            )
        })
    }
}

/// Parse a comma-separated list of ids, keeping order and dropping duplicates
pub fn parse_id_list<T>(key: &str, raw: &str) -> Result<Vec<T>>
where
    T: std::str::FromStr + PartialEq,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id: T = part
            .parse()
            .with_context(|| format!("Invalid id '{}' in {}", part, key))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => bail!("Missing required environment variable {}", key),
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TelegramConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = required(lookup, "BOT_TOKEN")?;

        let source_channels = parse_id_list(
            "SOURCE_CHANNEL_IDS",
            &required(lookup, "SOURCE_CHANNEL_IDS")?,
        )?;
        if source_channels.is_empty() {
            bail!("SOURCE_CHANNEL_IDS must list at least one channel");
        }

        let destination_channel = required(lookup, "DESTINATION_CHANNEL_ID")?
            .parse()
            .context("Invalid DESTINATION_CHANNEL_ID")?;

        let allowed_user_ids = match optional(lookup, "ALLOWED_USER_IDS") {
            Some(raw) => parse_id_list("ALLOWED_USER_IDS", &raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            bot_token,
            reader_token: optional(lookup, "READER_BOT_TOKEN"),
            source_channels,
            destination_channel,
            allowed_user_ids,
            log_level: optional(lookup, "LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()),
        })
    }
}

impl Config {
    /// Load the optional settings file at `path` plus the process environment
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            )
        } else {
            None
        };
        Self::from_parts(content.as_deref(), |key| std::env::var(key).ok())
    }

    fn from_parts(
        settings: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let settings: Settings = match settings {
            Some(content) => toml::from_str(content).context("Failed to parse config file")?,
            None => Settings::default(),
        };

        let config = Config {
            telegram: TelegramConfig::from_lookup(&lookup)?,
            storage: settings.storage.unwrap_or_default(),
            schedule: settings.schedule.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let schedule = &self.schedule;
        schedule.summary_at()?;
        if schedule.batch_size == 0 {
            bail!("schedule.batch_size must be greater than zero");
        }
        if schedule.scan_interval_secs == 0 {
            bail!("schedule.scan_interval_secs must be greater than zero");
        }
        if !(0.0..=1.0).contains(&schedule.retry_jitter) {
            bail!(
                "schedule.retry_jitter must be between 0.0 and 1.0, got {}",
                schedule.retry_jitter
            );
        }
        if schedule.error_window_hours <= 0 {
            bail!("schedule.error_window_hours must be positive");
        }
        self.telegram
            .log_level
            .parse::<tracing::Level>()
            .with_context(|| format!("Invalid LOG_LEVEL '{}'", self.telegram.log_level))?;
        Ok(())
    }
}
