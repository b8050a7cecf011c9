//! The chat platform as seen by the relay engine.
//!
//! The engine never talks to serenity directly; it goes through [`Platform`], which
//! keeps the synchronization logic testable against an in-memory fake.

pub mod discord;

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, UserId, WebhookId};
use std::error::Error as StdError;

/// Who wrote a message, as needed to impersonate them through a proxy endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bot: bool,
}

/// A message observed on the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub id: MessageId,
    pub author: Author,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Thread,
    Other,
}

/// Settings copied from an original thread onto its mirrors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThreadTemplate {
    pub name: String,
    pub auto_archive_minutes: Option<u16>,
    pub rate_limit_per_user: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub parent_id: Option<ChannelId>,
    pub kind: ChannelKind,
    pub thread: Option<ThreadTemplate>,
}

impl ChannelInfo {
    pub fn is_thread(&self) -> bool {
        self.kind == ChannelKind::Thread
    }

    /// The channel that owns proxy endpoints for posts into this channel: threads
    /// post through their parent's endpoints.
    pub fn endpoint_home(&self) -> ChannelId {
        match (self.kind, self.parent_id) {
            (ChannelKind::Thread, Some(parent)) => parent,
            _ => self.id,
        }
    }

    /// The thread to post into, if any.
    pub fn thread_id(&self) -> Option<ChannelId> {
        self.is_thread().then_some(self.id)
    }
}

/// A named post-as channel able to publish under another identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub id: WebhookId,
    pub channel_id: ChannelId,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{context}: {source}")]
    Request {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("unexpected platform response: {0}")]
    Unexpected(String),
}

impl PlatformError {
    pub fn request(context: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Request {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Platform operations the relay needs.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn channel(&self, channel_id: ChannelId) -> PlatformResult<ChannelInfo>;

    async fn endpoints(&self, channel_id: ChannelId) -> PlatformResult<Vec<ProxyEndpoint>>;

    async fn create_endpoint(&self, channel_id: ChannelId, name: &str) -> PlatformResult<ProxyEndpoint>;

    async fn delete_endpoint(&self, endpoint: &ProxyEndpoint) -> PlatformResult<()>;

    /// Posts `content` through `endpoint` disguised as `author`, optionally inside a
    /// thread of the endpoint's channel. Returns the new message's id.
    async fn execute_endpoint(
        &self,
        endpoint: &ProxyEndpoint,
        thread: Option<ChannelId>,
        author: &Author,
        content: &str,
    ) -> PlatformResult<MessageId>;

    async fn edit_endpoint_message(
        &self,
        endpoint: &ProxyEndpoint,
        thread: Option<ChannelId>,
        message_id: MessageId,
        content: &str,
    ) -> PlatformResult<()>;

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> PlatformResult<()>;

    /// Starts a thread anchored at an existing message. Returns the thread's id.
    async fn start_thread(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        template: &ThreadTemplate,
    ) -> PlatformResult<ChannelId>;

    /// The oldest `limit` messages of a channel, oldest first.
    async fn first_messages(&self, guild_id: GuildId, channel_id: ChannelId, limit: u8)
        -> PlatformResult<Vec<IncomingMessage>>;

    /// Posts a notice as the relay itself, optionally as a reply.
    async fn send_notice(
        &self,
        channel_id: ChannelId,
        reply_to: Option<MessageId>,
        content: &str,
    ) -> PlatformResult<()>;
}
