use anyhow::Result;
use async_trait::async_trait;

/// Identifier of a remote channel (Telegram chat id, usually negative for channels)
pub type ChannelId = i64;

/// Message identifier, monotonic within a single channel
pub type MessageId = i64;

/// A message read from a source channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: ChannelId,
    pub id: MessageId,
    /// Text body (or media caption). `None` for posts without any text.
    pub text: Option<String>,
}

/// A source channel that has been resolved and can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: ChannelId,
}

/// Why a source channel could not be resolved this cycle
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("channel {0} is private or the reader is not a member")]
    Private(ChannelId),

    #[error("channel {0} is invalid or does not exist")]
    Invalid(ChannelId),

    #[error("failed to resolve channel {channel}: {source}")]
    Transport {
        channel: ChannelId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Why the reading session could not be established
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("authentication rejected: {0}")]
    Rejected(String),
}

/// Read side of the remote service
#[async_trait]
pub trait ChannelReader: Send + Sync {
    async fn resolve(&self, channel: ChannelId) -> Result<ChannelHandle, ResolveError>;

    /// Fetch up to `limit` messages, ascending by id.
    ///
    /// `since = None` returns the most recent `limit` messages regardless of
    /// history. `since = Some(id)` returns only messages newer than `id`,
    /// oldest first, so a backlog drains across calls without gaps.
    async fn fetch(
        &self,
        handle: &ChannelHandle,
        since: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>>;
}

/// Publishes to the single destination channel
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn publish(&self, text: &str) -> Result<()>;
}

/// Remote session lifecycle used by the scheduler
#[async_trait]
pub trait Session: Send + Sync {
    async fn authenticate(&self) -> Result<(), AuthError>;

    async fn disconnect(&self);
}
