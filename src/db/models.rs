use crate::lang::Language;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId};
use serde::{Deserialize, Serialize};

/// Severity threshold for the per-guild logging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, poise::ChoiceParameter)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Per-tenant configuration blob, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildConfig {
    #[serde(default)]
    pub logging_channel: Option<ChannelId>,
    #[serde(default)]
    pub logging_level: Option<LogLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Guild {
    pub id: GuildId,
    pub config: GuildConfig,
}

impl Guild {
    pub fn new(id: GuildId) -> Self {
        Self {
            id,
            config: GuildConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub guild_id: GuildId,
    pub id: ChannelId,
    pub language: Language,
}

impl Channel {
    pub fn new(guild_id: GuildId, id: ChannelId, language: Language) -> Self {
        Self {
            guild_id,
            id,
            language,
        }
    }
}

/// Channels kept in sync with each other. A channel belongs to at most one group.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelGroup {
    pub id: i64,
    pub guild_id: GuildId,
    pub channels: Vec<Channel>,
}

impl ChannelGroup {
    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.channels.iter().any(|c| c.id == channel_id)
    }

    /// Every member except `channel_id`.
    pub fn others(&self, channel_id: ChannelId) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(move |c| c.id != channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// A relayed unit of content. Origin messages have no origin reference; derived
/// messages point at exactly one origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub id: MessageId,
    pub language: Language,
    pub origin_channel_id: Option<ChannelId>,
    pub origin_id: Option<MessageId>,
}

impl Message {
    pub fn origin(guild_id: GuildId, channel_id: ChannelId, id: MessageId, language: Language) -> Self {
        Self {
            guild_id,
            channel_id,
            id,
            language,
            origin_channel_id: None,
            origin_id: None,
        }
    }

    pub fn derived(
        guild_id: GuildId,
        channel_id: ChannelId,
        id: MessageId,
        language: Language,
        origin: &Message,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            id,
            language,
            origin_channel_id: Some(origin.channel_id),
            origin_id: Some(origin.id),
        }
    }

    /// The `(channel, message)` pair this row points at, if it is a derived copy.
    pub fn origin_ref(&self) -> Option<(ChannelId, MessageId)> {
        match (self.origin_channel_id, self.origin_id) {
            (Some(channel), Some(id)) => Some((channel, id)),
            _ => None,
        }
    }

    pub fn is_origin(&self) -> bool {
        self.origin_ref().is_none()
    }

    pub fn key(&self) -> (ChannelId, MessageId) {
        (self.channel_id, self.id)
    }
}
