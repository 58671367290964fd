use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::store::{KeywordStore, OffsetStore, Offsets};
use crate::transport::{ChannelId, ChannelReader, Forwarder};

/// Default number of messages fetched per source per cycle
pub const BATCH_SIZE: usize = 50;

/// Counters for one scan cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub examined: u64,
    pub forwarded: u64,
    pub failed_forwards: u64,
    pub skipped_sources: u64,
}

impl ScanResult {
    pub fn merge(&mut self, other: &ScanResult) {
        self.examined += other.examined;
        self.forwarded += other.forwarded;
        self.failed_forwards += other.failed_forwards;
        self.skipped_sources += other.skipped_sources;
    }
}

/// Case-insensitive substring match against already lower-cased keywords.
/// No tokenization: "xiaomi" matches "XiaomiMore".
pub fn matches_any(text: &str, keywords: &[String]) -> bool {
    let haystack = text.to_lowercase();
    keywords.iter().any(|keyword| haystack.contains(keyword.as_str()))
}

/// Scans the configured sources, forwards keyword matches, advances offsets
pub struct Pipeline {
    sources: Vec<ChannelId>,
    reader: Arc<dyn ChannelReader>,
    forwarder: Arc<dyn Forwarder>,
    offsets: Arc<OffsetStore>,
    keywords: KeywordStore,
    batch_size: usize,
}

impl Pipeline {
    pub fn new(
        sources: Vec<ChannelId>,
        reader: Arc<dyn ChannelReader>,
        forwarder: Arc<dyn Forwarder>,
        offsets: Arc<OffsetStore>,
        keywords: KeywordStore,
    ) -> Self {
        Self {
            sources,
            reader,
            forwarder,
            offsets,
            keywords,
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run one full pass over every source.
    ///
    /// Offsets and keywords are snapshotted once for the whole cycle. A failure
    /// on one source skips only that source; failing to load the keywords
    /// aborts the cycle.
    pub async fn run_cycle(&self) -> Result<ScanResult> {
        let mut offsets = self.offsets.read().await;
        let keywords = self
            .keywords
            .load()
            .await
            .context("Failed to load keywords for scan cycle")?;

        info!(
            "Starting scan cycle: {} source(s), {} keyword(s), {} stored offset(s)",
            self.sources.len(),
            keywords.len(),
            offsets.len()
        );

        let mut result = ScanResult::default();
        for &channel in &self.sources {
            if let Err(e) = self
                .scan_source(channel, &keywords, &mut offsets, &mut result)
                .await
            {
                error!(channel, "Skipping source for this cycle: {:#}", e);
                result.skipped_sources += 1;
            }
        }

        info!(
            "Scan cycle finished: {} examined, {} forwarded, {} failed, {} skipped",
            result.examined, result.forwarded, result.failed_forwards, result.skipped_sources
        );
        Ok(result)
    }

    async fn scan_source(
        &self,
        channel: ChannelId,
        keywords: &[String],
        offsets: &mut Offsets,
        result: &mut ScanResult,
    ) -> Result<()> {
        let handle = self.reader.resolve(channel).await?;

        let since = offsets.get(channel);
        match since {
            Some(id) => debug!(channel, "Fetching messages after offset {}", id),
            None => debug!(channel, "No offset stored, fetching the latest messages"),
        }

        let messages = self
            .reader
            .fetch(&handle, since, self.batch_size)
            .await
            .with_context(|| format!("Failed to fetch messages from channel {}", channel))?;

        let mut max_seen = since;
        for message in &messages {
            if since.is_some_and(|since| message.id <= since) {
                continue;
            }
            result.examined += 1;
            max_seen = max_seen.max(Some(message.id));

            let text = match message.text.as_deref() {
                Some(text) if !text.is_empty() => text,
                _ => continue,
            };
            if !matches_any(text, keywords) {
                continue;
            }

            info!(
                channel,
                message_id = message.id,
                "Forwarding message: {:?}...",
                preview(text, 100)
            );
            match self.forwarder.publish(text).await {
                Ok(()) => result.forwarded += 1,
                Err(e) => {
                    error!(
                        channel,
                        message_id = message.id,
                        "Failed to forward message: {:#}; text: {:?}",
                        e,
                        text
                    );
                    result.failed_forwards += 1;
                }
            }
        }

        if let Some(max) = max_seen {
            offsets.advance(channel, max);
            if let Err(e) = self.offsets.write(offsets).await {
                error!(channel, "{:#}", e);
            }
        }

        Ok(())
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
