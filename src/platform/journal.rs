use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, UpdateKind};
use teloxide::{ApiError, RequestError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::platform::long_poll_bot;
use crate::scheduler::backoff::BackoffPolicy;
use crate::scheduler::supervisor::supervise;
use crate::transport::{
    AuthError, ChannelHandle, ChannelId, ChannelReader, Message, MessageId, ResolveError, Session,
};

/// Posts kept per source channel
pub const JOURNAL_CAPACITY: usize = 500;

const FEED_RESTART_MIN: Duration = Duration::from_secs(5);
const FEED_RESTART_MAX: Duration = Duration::from_secs(60);

/// In-memory record of recent channel posts, per source, ascending by id
pub struct ChannelJournal {
    sources: HashSet<ChannelId>,
    capacity: usize,
    posts: RwLock<HashMap<ChannelId, VecDeque<Message>>>,
}

impl ChannelJournal {
    pub fn new(sources: &[ChannelId], capacity: usize) -> Self {
        Self {
            sources: sources.iter().copied().collect(),
            capacity,
            posts: RwLock::new(HashMap::new()),
        }
    }

    /// Store a post from a configured source. Duplicates and unknown
    /// channels are ignored. Returns true if the post was stored.
    pub async fn record(&self, message: Message) -> bool {
        if !self.sources.contains(&message.channel) {
            return false;
        }

        let mut posts = self.posts.write().await;
        let queue = posts.entry(message.channel).or_default();
        let position = queue.partition_point(|m| m.id < message.id);
        if queue.get(position).is_some_and(|m| m.id == message.id) {
            return false;
        }
        queue.insert(position, message);
        while queue.len() > self.capacity {
            queue.pop_front();
        }
        true
    }

    /// Newest `limit` posts when `since` is `None`, otherwise the oldest
    /// `limit` posts newer than `since`
    pub async fn since(
        &self,
        channel: ChannelId,
        since: Option<MessageId>,
        limit: usize,
    ) -> Vec<Message> {
        let posts = self.posts.read().await;
        let Some(queue) = posts.get(&channel) else {
            return Vec::new();
        };

        match since {
            None => {
                let skip = queue.len().saturating_sub(limit);
                queue.iter().skip(skip).cloned().collect()
            }
            Some(since) => queue
                .iter()
                .filter(|m| m.id > since)
                .take(limit)
                .cloned()
                .collect(),
        }
    }
}

/// Reads source channels through a dedicated reader bot that is a member of
/// every source. Posts arrive as `channel_post` updates into the journal.
pub struct TelegramReader {
    bot: Option<Bot>,
    journal: Arc<ChannelJournal>,
    cancel: CancellationToken,
}

impl TelegramReader {
    pub fn new(token: Option<&str>, sources: &[ChannelId]) -> Result<Self> {
        let bot = match token {
            Some(token) => Some(long_poll_bot(token)?),
            None => None,
        };
        Ok(Self {
            bot,
            journal: Arc::new(ChannelJournal::new(sources, JOURNAL_CAPACITY)),
            cancel: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Session for TelegramReader {
    async fn authenticate(&self) -> Result<(), AuthError> {
        let bot = self
            .bot
            .clone()
            .ok_or(AuthError::MissingCredential("READER_BOT_TOKEN"))?;

        let me = bot
            .get_me()
            .await
            .map_err(|e| AuthError::Rejected(e.to_string()))?;
        info!("Reader session authorized as @{}", me.username());

        bot.delete_webhook()
            .send()
            .await
            .map_err(|e| AuthError::Rejected(format!("failed to clear webhook: {e}")))?;

        let journal = Arc::clone(&self.journal);
        let cancel = self.cancel.clone();
        let feed_cancel = self.cancel.clone();
        tokio::spawn(async move {
            let policy = BackoffPolicy::exponential(FEED_RESTART_MIN, FEED_RESTART_MAX);
            let feed = supervise("channel-feed", policy, move || {
                run_feed(bot.clone(), Arc::clone(&journal), feed_cancel.clone())
            });
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = feed => {}
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        info!("Reader session released");
    }
}

#[async_trait]
impl ChannelReader for TelegramReader {
    async fn resolve(&self, channel: ChannelId) -> Result<ChannelHandle, ResolveError> {
        let bot = self.bot.as_ref().ok_or_else(|| ResolveError::Transport {
            channel,
            source: "reader session is not configured".into(),
        })?;

        match bot.get_chat(ChatId(channel)).await {
            Ok(_) => Ok(ChannelHandle { id: channel }),
            Err(RequestError::Api(ApiError::ChatNotFound)) => Err(ResolveError::Invalid(channel)),
            Err(RequestError::Api(ApiError::BotKicked)) => Err(ResolveError::Private(channel)),
            Err(e) => Err(ResolveError::Transport {
                channel,
                source: Box::new(e),
            }),
        }
    }

    async fn fetch(
        &self,
        handle: &ChannelHandle,
        since: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        Ok(self.journal.since(handle.id, since, limit).await)
    }
}

/// Long-poll `channel_post` updates into the journal until cancelled
async fn run_feed(bot: Bot, journal: Arc<ChannelJournal>, cancel: CancellationToken) -> Result<()> {
    info!("Starting channel post feed");
    let mut offset: i32 = 0;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Channel post feed stopped");
                return Ok(());
            }
            result = bot
                .get_updates()
                .offset(offset)
                .timeout(30)
                .allowed_updates(vec![AllowedUpdate::ChannelPost])
                .send() => result,
        };

        match result {
            Ok(updates) => {
                for update in updates {
                    offset = update.id.as_offset();
                    if let UpdateKind::ChannelPost(post) = update.kind {
                        let message = Message {
                            channel: post.chat.id.0,
                            id: MessageId::from(post.id.0),
                            text: post.text().or(post.caption()).map(str::to_string),
                        };
                        let (channel, id) = (message.channel, message.id);
                        if journal.record(message).await {
                            debug!(channel, message_id = id, "Recorded channel post");
                        }
                    }
                }
            }
            Err(RequestError::Api(e)) => {
                return Err(RequestError::Api(e)).context("Channel post feed rejected by Telegram");
            }
            Err(RequestError::RetryAfter(wait)) => {
                warn!("Channel post feed rate limited for {:?}", wait.duration());
                tokio::time::sleep(wait.duration()).await;
            }
            Err(e) => {
                warn!("Channel post feed getUpdates failed: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(channel: ChannelId, id: MessageId) -> Message {
        Message {
            channel,
            id,
            text: Some(format!("post {id}")),
        }
    }

    fn ids(messages: &[Message]) -> Vec<MessageId> {
        messages.iter().map(|m| m.id).collect()
    }

    #[tokio::test]
    async fn test_since_none_returns_latest_batch() {
        let journal = ChannelJournal::new(&[100], 100);
        for id in 1..=10 {
            journal.record(post(100, id)).await;
        }
        assert_eq!(ids(&journal.since(100, None, 3).await), vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn test_since_offset_returns_oldest_unseen_first() {
        let journal = ChannelJournal::new(&[100], 100);
        for id in 1..=10 {
            journal.record(post(100, id)).await;
        }
        assert_eq!(ids(&journal.since(100, Some(4), 3).await), vec![5, 6, 7]);
        assert!(journal.since(100, Some(10), 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_record_orders_dedups_and_filters() {
        let journal = ChannelJournal::new(&[100], 100);
        assert!(journal.record(post(100, 5)).await);
        assert!(journal.record(post(100, 3)).await);
        assert!(!journal.record(post(100, 5)).await);
        assert!(!journal.record(post(999, 1)).await);

        assert_eq!(ids(&journal.since(100, None, 10).await), vec![3, 5]);
        assert!(journal.since(999, None, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let journal = ChannelJournal::new(&[100], 3);
        for id in 1..=5 {
            journal.record(post(100, id)).await;
        }
        assert_eq!(ids(&journal.since(100, None, 10).await), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_missing_token_fails_authentication() {
        let reader = TelegramReader::new(None, &[100]).unwrap();
        assert!(matches!(
            reader.authenticate().await,
            Err(AuthError::MissingCredential("READER_BOT_TOKEN"))
        ));
    }
}
