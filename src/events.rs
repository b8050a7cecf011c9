use crate::db::Guild;
use crate::dispatch::Dispatcher;
use crate::error::RelayResult;
use crate::event_context::EventContext;
use crate::platform::{IncomingMessage, Platform};
use crate::queue::SerialQueues;
use crate::registry::ChannelRegistry;
use crate::threads::ThreadMirror;
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument, Span};

/// Platform events the relay reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MessageCreated(IncomingMessage),
    MessageUpdated(IncomingMessage),
    MessageDeleted {
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    },
    ThreadCreated {
        guild_id: GuildId,
        parent_id: ChannelId,
        thread_id: ChannelId,
    },
    GuildAvailable {
        guild_id: GuildId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
    ThreadCreated,
    GuildAvailable,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MessageCreated(_) => EventKind::MessageCreated,
            Event::MessageUpdated(_) => EventKind::MessageUpdated,
            Event::MessageDeleted { .. } => EventKind::MessageDeleted,
            Event::ThreadCreated { .. } => EventKind::ThreadCreated,
            Event::GuildAvailable { .. } => EventKind::GuildAvailable,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        match self {
            Event::MessageCreated(msg) | Event::MessageUpdated(msg) => msg.guild_id,
            Event::MessageDeleted { guild_id, .. }
            | Event::ThreadCreated { guild_id, .. }
            | Event::GuildAvailable { guild_id } => *guild_id,
        }
    }

    /// The channel whose events must be handled in arrival order. Guild-wide
    /// events have none.
    pub fn source_channel(&self) -> Option<ChannelId> {
        match self {
            Event::MessageCreated(msg) | Event::MessageUpdated(msg) => Some(msg.channel_id),
            Event::MessageDeleted { channel_id, .. } => Some(*channel_id),
            Event::ThreadCreated { parent_id, .. } => Some(*parent_id),
            Event::GuildAvailable { .. } => None,
        }
    }

    fn span(&self) -> Span {
        match self {
            Event::MessageCreated(msg) | Event::MessageUpdated(msg) => info_span!(
                "event",
                kind = ?self.kind(),
                guild = %msg.guild_id,
                channel = %msg.channel_id,
                message = %msg.id
            ),
            Event::MessageDeleted {
                guild_id,
                channel_id,
                message_id,
            } => info_span!(
                "event",
                kind = ?self.kind(),
                guild = %guild_id,
                channel = %channel_id,
                message = %message_id
            ),
            Event::ThreadCreated {
                guild_id,
                parent_id,
                thread_id,
            } => info_span!(
                "event",
                kind = ?self.kind(),
                guild = %guild_id,
                channel = %parent_id,
                thread = %thread_id
            ),
            Event::GuildAvailable { guild_id } => info_span!("event", kind = ?self.kind(), guild = %guild_id),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, cx: &EventContext, event: &Event) -> RelayResult<()>;
}

#[async_trait]
impl EventHandler for Dispatcher {
    async fn handle(&self, cx: &EventContext, event: &Event) -> RelayResult<()> {
        match event {
            Event::MessageCreated(msg) => self.on_create(cx, msg).await,
            Event::MessageUpdated(msg) => self.on_update(cx, msg).await,
            Event::MessageDeleted {
                guild_id,
                channel_id,
                message_id,
            } => self.on_delete(cx, *guild_id, *channel_id, *message_id).await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EventHandler for ThreadMirror {
    async fn handle(&self, cx: &EventContext, event: &Event) -> RelayResult<()> {
        match event {
            Event::ThreadCreated {
                guild_id,
                parent_id,
                thread_id,
            } => self.on_thread_created(cx, *guild_id, *parent_id, *thread_id).await,
            _ => Ok(()),
        }
    }
}

/// Records guilds on first contact. The row itself is upserted while the event
/// context is built.
pub struct GuildBootstrap;

#[async_trait]
impl EventHandler for GuildBootstrap {
    async fn handle(&self, cx: &EventContext, _event: &Event) -> RelayResult<()> {
        info!(
            guild = %cx.guild_id(),
            logging_channel = ?cx.guild.config.logging_channel,
            "Guild available"
        );
        Ok(())
    }
}

/// Routes each event kind to its handler.
///
/// Events submitted for one channel are handled one after another in the order
/// they arrived, so a message is relayed before its edit or deletion is looked
/// at. Different channels are handled concurrently.
pub struct EventTable {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
    registry: ChannelRegistry,
    platform: Arc<dyn Platform>,
    queues: SerialQueues<ChannelId>,
}

impl EventTable {
    pub fn new(registry: ChannelRegistry, platform: Arc<dyn Platform>) -> Self {
        Self {
            handlers: HashMap::new(),
            registry,
            platform,
            queues: SerialQueues::new(),
        }
    }

    /// The relay's full table.
    pub fn relay(registry: ChannelRegistry, platform: Arc<dyn Platform>, dispatcher: Dispatcher, mirror: ThreadMirror) -> Self {
        let dispatcher: Arc<dyn EventHandler> = Arc::new(dispatcher);
        Self::new(registry, platform)
            .register(EventKind::MessageCreated, dispatcher.clone())
            .register(EventKind::MessageUpdated, dispatcher.clone())
            .register(EventKind::MessageDeleted, dispatcher)
            .register(EventKind::ThreadCreated, Arc::new(mirror))
            .register(EventKind::GuildAvailable, Arc::new(GuildBootstrap))
    }

    pub fn register(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Queues `event` behind the earlier events of its channel.
    pub fn submit(self: &Arc<Self>, event: Event) {
        let table = self.clone();
        let channel = event.source_channel();
        let job = Box::pin(async move { table.dispatch(event).await });
        match channel {
            Some(channel_id) => self.queues.submit(channel_id, job),
            None => {
                tokio::spawn(job);
            }
        }
    }

    /// Runs the handler for `event` inside the event's span. Failures are logged
    /// and reported back to the channel the event came from.
    pub async fn dispatch(&self, event: Event) {
        let Some(handler) = self.handlers.get(&event.kind()) else {
            return;
        };

        let span = event.span();
        let guild_id = event.guild_id();
        let guild = match self.registry.guild(guild_id).instrument(span.clone()).await {
            Ok(guild) => guild,
            Err(e) => {
                error!(parent: &span, error = %e, "Failed to load guild settings");
                Guild::new(guild_id)
            }
        };
        let cx = EventContext::new(guild, span.clone(), self.platform.clone());

        let Err(e) = handler.handle(&cx, &event).instrument(span.clone()).await else {
            return;
        };

        e.log(&cx);
        let platform = self.platform.as_ref();
        async {
            match &event {
                Event::MessageCreated(msg) | Event::MessageUpdated(msg) => {
                    e.notify_origin(platform, msg.channel_id, msg.id).await
                }
                Event::MessageDeleted { channel_id, .. } => e.notify_channel(platform, *channel_id).await,
                Event::ThreadCreated { thread_id, .. } => e.notify_channel(platform, *thread_id).await,
                Event::GuildAvailable { .. } => {}
            }
        }
        .instrument(span)
        .await
    }
}
