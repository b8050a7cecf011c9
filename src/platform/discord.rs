use super::{
    Author, ChannelInfo, ChannelKind, IncomingMessage, Platform, PlatformError, PlatformResult, ProxyEndpoint,
    ThreadTemplate,
};
use crate::config::DISCORD_MESSAGE_LIMIT;
use crate::events::Event;
use async_trait::async_trait;
use lru::LruCache;
use poise::serenity_prelude as serenity;
use serenity::{
    AutoArchiveDuration, ChannelId, ChannelType, CreateAllowedMentions, CreateMessage, CreateThread, CreateWebhook,
    EditWebhookMessage, ExecuteWebhook, GetMessages, GuildChannel, GuildId, Http, Message, MessageId, MessageType,
    Webhook, WebhookId,
};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const WEBHOOK_CACHE_CAPACITY: usize = 256;

/// [`Platform`] over the Discord REST API.
pub struct DiscordPlatform {
    http: Arc<Http>,
    webhooks: Mutex<LruCache<WebhookId, Webhook>>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        let capacity = NonZeroUsize::new(WEBHOOK_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            http,
            webhooks: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn remember(&self, webhook: &Webhook) {
        self.webhooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(webhook.id, webhook.clone());
    }

    fn forget(&self, id: WebhookId) {
        self.webhooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(&id);
    }

    /// The full webhook (with its token) behind an endpoint.
    async fn webhook(&self, endpoint: &ProxyEndpoint) -> PlatformResult<Webhook> {
        let cached = self
            .webhooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&endpoint.id)
            .cloned();
        if let Some(webhook) = cached {
            return Ok(webhook);
        }

        let webhook = Webhook::from_id(&self.http, endpoint.id)
            .await
            .map_err(|e| PlatformError::request(format!("fetching webhook {}", endpoint.id), e))?;
        self.remember(&webhook);
        Ok(webhook)
    }
}

fn endpoint_from(webhook: &Webhook, channel_id: ChannelId) -> ProxyEndpoint {
    ProxyEndpoint {
        id: webhook.id,
        channel_id: webhook.channel_id.unwrap_or(channel_id),
        name: webhook.name.clone().unwrap_or_default(),
    }
}

fn channel_info(channel: &GuildChannel) -> ChannelInfo {
    let kind = match channel.kind {
        ChannelType::Text | ChannelType::News => ChannelKind::Text,
        ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread => ChannelKind::Thread,
        _ => ChannelKind::Other,
    };

    let thread = (kind == ChannelKind::Thread).then(|| ThreadTemplate {
        name: channel.name.clone(),
        auto_archive_minutes: channel
            .thread_metadata
            .as_ref()
            .map(|meta| u16::from(meta.auto_archive_duration)),
        rate_limit_per_user: channel.rate_limit_per_user.map(u16::from),
    });

    ChannelInfo {
        id: channel.id,
        parent_id: channel.parent_id,
        kind,
        thread,
    }
}

fn author_of(message: &Message) -> Author {
    let display_name = message
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .unwrap_or_else(|| message.author.display_name().to_string());

    Author {
        id: message.author.id,
        display_name,
        avatar_url: Some(message.author.face()),
        bot: message.author.bot,
    }
}

fn is_user_content(message: &Message) -> bool {
    matches!(message.kind, MessageType::Regular | MessageType::InlineReply)
}

/// A guild message written by a person, as the relay sees it.
pub fn incoming_from(message: &Message) -> Option<IncomingMessage> {
    if message.author.bot || message.webhook_id.is_some() || !is_user_content(message) {
        return None;
    }

    Some(IncomingMessage {
        guild_id: message.guild_id?,
        channel_id: message.channel_id,
        id: message.id,
        author: author_of(message),
        content: message.content.clone(),
    })
}

/// Translates a gateway event into the relay's events.
pub fn events_from(event: &serenity::FullEvent) -> Vec<Event> {
    match event {
        serenity::FullEvent::Message { new_message } => incoming_from(new_message)
            .map(Event::MessageCreated)
            .into_iter()
            .collect(),
        serenity::FullEvent::MessageUpdate { new, event, .. } => {
            if let Some(message) = new {
                return incoming_from(message).map(Event::MessageUpdated).into_iter().collect();
            }

            let (Some(guild_id), Some(author), Some(content)) = (event.guild_id, &event.author, &event.content) else {
                return Vec::new();
            };
            if author.bot {
                return Vec::new();
            }
            vec![Event::MessageUpdated(IncomingMessage {
                guild_id,
                channel_id: event.channel_id,
                id: event.id,
                author: Author {
                    id: author.id,
                    display_name: author.display_name().to_string(),
                    avatar_url: Some(author.face()),
                    bot: author.bot,
                },
                content: content.clone(),
            })]
        }
        serenity::FullEvent::MessageDelete {
            channel_id,
            deleted_message_id,
            guild_id: Some(guild_id),
        } => vec![Event::MessageDeleted {
            guild_id: *guild_id,
            channel_id: *channel_id,
            message_id: *deleted_message_id,
        }],
        serenity::FullEvent::ThreadCreate { thread, .. } => match thread.parent_id {
            Some(parent_id) => vec![Event::ThreadCreated {
                guild_id: thread.guild_id,
                parent_id,
                thread_id: thread.id,
            }],
            None => Vec::new(),
        },
        serenity::FullEvent::GuildCreate { guild, .. } => vec![Event::GuildAvailable { guild_id: guild.id }],
        serenity::FullEvent::Ready { data_about_bot } => data_about_bot
            .guilds
            .iter()
            .map(|guild| Event::GuildAvailable { guild_id: guild.id })
            .collect(),
        _ => Vec::new(),
    }
}

fn fit(content: &str) -> String {
    content.chars().take(DISCORD_MESSAGE_LIMIT).collect()
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn channel(&self, channel_id: ChannelId) -> PlatformResult<ChannelInfo> {
        let channel = channel_id
            .to_channel(&self.http)
            .await
            .map_err(|e| PlatformError::request(format!("fetching channel {}", channel_id), e))?;

        Ok(match channel.guild() {
            Some(guild_channel) => channel_info(&guild_channel),
            None => ChannelInfo {
                id: channel_id,
                parent_id: None,
                kind: ChannelKind::Other,
                thread: None,
            },
        })
    }

    async fn endpoints(&self, channel_id: ChannelId) -> PlatformResult<Vec<ProxyEndpoint>> {
        let webhooks = channel_id
            .webhooks(&self.http)
            .await
            .map_err(|e| PlatformError::request(format!("listing webhooks of {}", channel_id), e))?;

        Ok(webhooks
            .iter()
            .filter(|webhook| webhook.token.is_some())
            .map(|webhook| {
                self.remember(webhook);
                endpoint_from(webhook, channel_id)
            })
            .collect())
    }

    async fn create_endpoint(&self, channel_id: ChannelId, name: &str) -> PlatformResult<ProxyEndpoint> {
        let webhook = channel_id
            .create_webhook(&self.http, CreateWebhook::new(name))
            .await
            .map_err(|e| PlatformError::request(format!("creating webhook in {}", channel_id), e))?;
        self.remember(&webhook);
        Ok(endpoint_from(&webhook, channel_id))
    }

    async fn delete_endpoint(&self, endpoint: &ProxyEndpoint) -> PlatformResult<()> {
        let webhook = self.webhook(endpoint).await?;
        self.forget(endpoint.id);
        webhook
            .delete(&self.http)
            .await
            .map_err(|e| PlatformError::request(format!("deleting webhook {}", endpoint.id), e))
    }

    async fn execute_endpoint(
        &self,
        endpoint: &ProxyEndpoint,
        thread: Option<ChannelId>,
        author: &Author,
        content: &str,
    ) -> PlatformResult<MessageId> {
        let webhook = self.webhook(endpoint).await?;

        let mut builder = ExecuteWebhook::new()
            .content(fit(content))
            .username(author.display_name.clone())
            .allowed_mentions(CreateAllowedMentions::new());
        if let Some(avatar) = &author.avatar_url {
            builder = builder.avatar_url(avatar.clone());
        }
        if let Some(thread) = thread {
            builder = builder.in_thread(thread);
        }

        let sent = webhook.execute(&self.http, true, builder).await.map_err(|e| {
            self.forget(endpoint.id);
            PlatformError::request(format!("executing webhook {}", endpoint.id), e)
        })?;

        sent.map(|message| message.id)
            .ok_or_else(|| PlatformError::Unexpected("webhook execution returned no message".to_string()))
    }

    async fn edit_endpoint_message(
        &self,
        endpoint: &ProxyEndpoint,
        thread: Option<ChannelId>,
        message_id: MessageId,
        content: &str,
    ) -> PlatformResult<()> {
        let webhook = self.webhook(endpoint).await?;

        let mut builder = EditWebhookMessage::new().content(fit(content));
        if let Some(thread) = thread {
            builder = builder.in_thread(thread);
        }

        webhook
            .edit_message(&self.http, message_id, builder)
            .await
            .map(drop)
            .map_err(|e| PlatformError::request(format!("editing message {}", message_id), e))
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> PlatformResult<()> {
        channel_id
            .delete_message(&self.http, message_id)
            .await
            .map_err(|e| PlatformError::request(format!("deleting message {}", message_id), e))
    }

    async fn start_thread(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        template: &ThreadTemplate,
    ) -> PlatformResult<ChannelId> {
        let mut builder = CreateThread::new(template.name.clone());
        if let Some(minutes) = template.auto_archive_minutes {
            builder = builder.auto_archive_duration(AutoArchiveDuration::from(minutes));
        }
        if let Some(seconds) = template.rate_limit_per_user {
            builder = builder.rate_limit_per_user(seconds);
        }

        let thread = channel_id
            .create_thread_from_message(&self.http, message_id, builder)
            .await
            .map_err(|e| PlatformError::request(format!("starting thread on {}", message_id), e))?;
        debug!(channel = %channel_id, thread = %thread.id, "Started thread");
        Ok(thread.id)
    }

    async fn first_messages(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        limit: u8,
    ) -> PlatformResult<Vec<IncomingMessage>> {
        // Every message in a thread is newer than the thread itself.
        let after = MessageId::new(channel_id.get());
        let mut messages = channel_id
            .messages(&self.http, GetMessages::new().after(after).limit(limit))
            .await
            .map_err(|e| PlatformError::request(format!("fetching messages of {}", channel_id), e))?;
        messages.sort_by_key(|message| message.id);

        Ok(messages
            .iter()
            .filter_map(|message| {
                let mut incoming = incoming_from(message)?;
                incoming.guild_id = guild_id;
                Some(incoming)
            })
            .collect())
    }

    async fn send_notice(
        &self,
        channel_id: ChannelId,
        reply_to: Option<MessageId>,
        content: &str,
    ) -> PlatformResult<()> {
        let mut builder = CreateMessage::new()
            .content(fit(content))
            .allowed_mentions(CreateAllowedMentions::new());
        if let Some(message_id) = reply_to {
            builder = builder.reference_message((channel_id, message_id));
        }

        channel_id
            .send_message(&self.http, builder)
            .await
            .map(drop)
            .map_err(|e| PlatformError::request(format!("sending notice to {}", channel_id), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poise::serenity_prelude as serenity;
    use serenity::{User, UserId};

    fn message(bot: bool, kind: MessageType) -> Message {
        let mut message = Message::default();
        message.id = MessageId::new(100);
        message.channel_id = ChannelId::new(10);
        message.guild_id = Some(GuildId::new(1));
        message.author = User::default();
        message.author.id = UserId::new(7);
        message.author.name = "alice".to_string();
        message.author.bot = bot;
        message.kind = kind;
        message.content = "Hello".to_string();
        message
    }

    #[test]
    fn test_user_messages_become_events() {
        let event = serenity::FullEvent::Message {
            new_message: message(false, MessageType::Regular),
        };
        let events = events_from(&event);
        assert_eq!(events.len(), 1);
        let Event::MessageCreated(incoming) = &events[0] else {
            panic!("expected a created message, got {:?}", events[0]);
        };
        assert_eq!(incoming.guild_id, GuildId::new(1));
        assert_eq!(incoming.author.display_name, "alice");
        assert_eq!(incoming.content, "Hello");
    }

    #[test]
    fn test_bots_and_system_messages_are_ignored() {
        assert!(incoming_from(&message(true, MessageType::Regular)).is_none());
        assert!(incoming_from(&message(false, MessageType::ThreadStarterMessage)).is_none());
        assert!(incoming_from(&message(false, MessageType::InlineReply)).is_some());

        let mut direct = message(false, MessageType::Regular);
        direct.guild_id = None;
        assert!(incoming_from(&direct).is_none());
    }

    #[test]
    fn test_fit_caps_length() {
        let long = "a".repeat(DISCORD_MESSAGE_LIMIT * 2);
        assert_eq!(fit(&long).len(), DISCORD_MESSAGE_LIMIT);
    }
}
