use crate::db::{Database, IdempotentExt, Message, OptionalExt, StoreError, StoreResult};
use crate::lang::Language;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId};
use tracing::debug;

/// Maps origin messages to their translated copies.
///
/// All writes are idempotent inserts; a caller racing on the same key observes the
/// row the winner created.
#[derive(Clone)]
pub struct MessageLedger {
    db: Database,
}

impl MessageLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> StoreResult<Option<Message>> {
        self.db
            .run_blocking(move |db| db.message(guild_id, channel_id, message_id).optional())
            .await
    }

    pub async fn get_or_create_origin(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        language: Language,
    ) -> StoreResult<Message> {
        self.db
            .run_blocking(move |db| {
                if let Some(existing) = db.message(guild_id, channel_id, message_id).optional()? {
                    return Ok(existing);
                }

                let origin = Message::origin(guild_id, channel_id, message_id, language);
                if !db.insert_message(&origin).or_no_affect()? {
                    debug!(channel = %channel_id, message = %message_id, "Origin row already recorded");
                }
                db.message(guild_id, channel_id, message_id)
            })
            .await
    }

    /// Records a translated copy of `origin`. When a copy in `language` already
    /// exists, that row is returned instead.
    pub async fn get_or_create_derived(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        language: Language,
        origin: &Message,
    ) -> StoreResult<Message> {
        let derived = Message::derived(origin.guild_id, channel_id, message_id, language, origin);
        self.db
            .run_blocking(move |db| {
                if db.insert_message(&derived).or_no_affect()? {
                    return Ok(derived);
                }

                match db.message(derived.guild_id, channel_id, message_id).optional()? {
                    Some(existing) => Ok(existing),
                    None => {
                        let (origin_channel, origin_id) = derived.origin_ref().ok_or(StoreError::NotFound)?;
                        db.message_with_origin_by_lang(derived.guild_id, origin_channel, origin_id, language)
                    }
                }
            })
            .await
    }

    /// Follows a derived message's origin reference one hop. A dangling reference
    /// falls back to the message itself.
    pub async fn resolve_canonical_origin(&self, message: &Message) -> StoreResult<Message> {
        let Some((origin_channel, origin_id)) = message.origin_ref() else {
            return Ok(message.clone());
        };

        let guild_id = message.guild_id;
        let origin = self
            .db
            .run_blocking(move |db| db.message(guild_id, origin_channel, origin_id).optional())
            .await?;

        Ok(origin.unwrap_or_else(|| {
            debug!(
                channel = %message.channel_id,
                message = %message.id,
                origin = %origin_id,
                "Origin row missing, treating message as canonical"
            );
            message.clone()
        }))
    }

    /// Every derived copy of `origin`.
    pub async fn siblings_of(&self, origin: &Message) -> StoreResult<Vec<Message>> {
        let (guild_id, channel_id, id) = (origin.guild_id, origin.channel_id, origin.id);
        let siblings = self
            .db
            .run_blocking(move |db| db.messages_with_origin(guild_id, channel_id, id).optional())
            .await?;
        Ok(siblings.unwrap_or_default())
    }

    /// `origin` followed by every derived copy of it.
    pub async fn family_of(&self, origin: &Message) -> StoreResult<Vec<Message>> {
        let mut family = vec![origin.clone()];
        family.extend(self.siblings_of(origin).await?);
        Ok(family)
    }

    pub async fn derived_in_language(&self, origin: &Message, language: Language) -> StoreResult<Option<Message>> {
        let (guild_id, channel_id, id) = (origin.guild_id, origin.channel_id, origin.id);
        self.db
            .run_blocking(move |db| {
                db.message_with_origin_by_lang(guild_id, channel_id, id, language)
                    .optional()
            })
            .await
    }

    /// Deletes a row. Returns `false` when it was already gone.
    pub async fn remove(&self, message: &Message) -> StoreResult<bool> {
        let message = message.clone();
        self.db
            .run_blocking(move |db| db.delete_message(&message).or_no_affect())
            .await
    }
}
