//! Mirrors threads across a message's translated family.
//!
//! When someone opens a thread on a relayed message, a thread is opened on every
//! copy of that message, the threads are grouped with each other, and the first
//! messages already posted in the original thread are relayed into the mirrors.

use crate::config::THREAD_NAME_LIMIT;
use crate::db::{Channel, ChannelGroup, Message, StoreError};
use crate::dispatch::{join_targets, spawn_for_target, truncate_chars, Dispatcher};
use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::event_context::EventContext;
use crate::platform::ThreadTemplate;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// A thread started from a message shares that message's id.
///
/// This is how the platform names threads, not something the relay decides; it is
/// the only place the two id spaces are mixed.
pub fn starter_message_id(thread_id: ChannelId) -> MessageId {
    MessageId::new(thread_id.get())
}

#[derive(Clone)]
pub struct ThreadMirror {
    dispatcher: Dispatcher,
    replay_limit: u8,
}

impl ThreadMirror {
    pub fn new(dispatcher: Dispatcher, replay_limit: u8) -> Self {
        Self {
            dispatcher,
            replay_limit,
        }
    }

    pub async fn on_thread_created(
        &self,
        cx: &EventContext,
        guild_id: GuildId,
        parent_id: ChannelId,
        thread_id: ChannelId,
    ) -> RelayResult<()> {
        let ledger = &self.dispatcher.ledger;
        let Some(starter) = ledger
            .find(guild_id, parent_id, starter_message_id(thread_id))
            .await?
        else {
            debug!(thread = %thread_id, "Thread was not started from a relayed message");
            return Ok(());
        };

        let origin = ledger.resolve_canonical_origin(&starter).await?;
        let mut failures = Vec::new();

        let group = {
            let _guard = self.dispatcher.lock_origin(&origin).await;
            self.mirror(&starter, &origin, thread_id, &mut failures).await?
        };

        if let Some(group) = group {
            info!(guild = %guild_id, thread = %thread_id, members = group.len(), "Mirrored thread");
            failures.extend(self.replay(cx, guild_id, thread_id).await);
        }

        match RelayError::aggregate("could not mirror the thread into every linked channel", failures) {
            Some(error) => Err(error.field("thread", thread_id)),
            None => Ok(()),
        }
    }

    /// Registers the thread, opens its mirrors and groups them. Returns `None` when
    /// there is nothing to mirror.
    async fn mirror(
        &self,
        starter: &Message,
        origin: &Message,
        thread_id: ChannelId,
        failures: &mut Vec<RelayError>,
    ) -> RelayResult<Option<ChannelGroup>> {
        let registry = &self.dispatcher.registry;
        let platform = &self.dispatcher.platform;
        let guild_id = starter.guild_id;

        let family = self.dispatcher.ledger.family_of(origin).await?;
        if family.len() < 2 {
            debug!(thread = %thread_id, "Starter message has no translations");
            return Ok(None);
        }

        let info = platform.channel(thread_id).await?;
        if !info.is_thread() {
            return Err(RelayError::new(ErrorKind::PreconditionFailed, "channel is not a thread")
                .field("thread", thread_id));
        }

        let thread = Channel::new(guild_id, thread_id, starter.language);
        let created = registry
            .register(thread.clone())
            .await
            .map_err(|e| RelayError::from(e).field("thread", thread_id))?;
        if !created {
            // Threads opened by the relay itself are grouped before their creation
            // event gets past the origin lock.
            if registry.group(guild_id, thread_id).await?.is_some() {
                debug!(thread = %thread_id, "Thread is already mirrored");
                return Ok(None);
            }
            registry.update_channel(thread.clone()).await?;
        }

        let template = info.thread.clone().unwrap_or_else(|| ThreadTemplate {
            name: format!("thread-{}", thread_id),
            ..Default::default()
        });

        let from = starter.language;
        let mut tasks = JoinSet::new();
        for member in family.into_iter().filter(|m| m.key() != starter.key()) {
            let dispatcher = self.dispatcher.clone();
            let mut template = template.clone();
            spawn_for_target(&mut tasks, member.channel_id, async move {
                let name = dispatcher.translate(from, member.language, &template.name).await?;
                template.name = truncate_chars(name, THREAD_NAME_LIMIT);
                let mirror_id = dispatcher
                    .platform
                    .start_thread(member.channel_id, member.id, &template)
                    .await?;
                let mirror = Channel::new(member.guild_id, mirror_id, member.language);
                dispatcher.registry.register(mirror.clone()).await?;
                Ok(mirror)
            });
        }

        let (mirrors, mirror_failures) = join_targets(tasks).await;
        failures.extend(mirror_failures);
        if mirrors.is_empty() {
            return Ok(None);
        }

        let mut members = vec![thread];
        members.extend(mirrors);
        match registry.create_group(guild_id, members).await {
            Ok(group) => Ok(Some(group)),
            Err(StoreError::NoAffect) => Err(RelayError::new(
                ErrorKind::PreconditionFailed,
                "a mirrored thread already belongs to another group",
            )
            .field("thread", thread_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Relays the messages already posted in the original thread, oldest first.
    async fn replay(&self, cx: &EventContext, guild_id: GuildId, thread_id: ChannelId) -> Vec<RelayError> {
        let messages = match self
            .dispatcher
            .platform
            .first_messages(guild_id, thread_id, self.replay_limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => return vec![RelayError::from(e).field("thread", thread_id)],
        };

        let mut failures = Vec::new();
        for msg in messages.iter().filter(|m| !m.author.bot) {
            if let Err(e) = self.dispatcher.on_create(cx, msg).await {
                failures.push(e);
            }
        }
        debug!(thread = %thread_id, replayed = messages.len(), "Replayed thread history");
        failures
    }
}
