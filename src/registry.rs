use crate::db::{Channel, ChannelGroup, Database, Guild, IdempotentExt, OptionalExt, StoreError, StoreResult};
use crate::lang::Language;
use crate::platform::ChannelKind;
use poise::serenity_prelude::{ChannelId, GuildId};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a channel cannot be linked to itself")]
    SameChannel,

    #[error("only channels of the same kind can be linked")]
    IncompatibleKinds,

    #[error("both channels already belong to different groups; unlink one of them first")]
    AlreadyGrouped,

    #[error("the group already has a channel in {0}")]
    LanguageConflict(Language),

    #[error("channel is not linked to any other channel")]
    NotGrouped,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves channels and their groups, and mutates group membership.
#[derive(Clone)]
pub struct ChannelRegistry {
    db: Database,
    default_language: Language,
}

impl ChannelRegistry {
    pub fn new(db: Database, default_language: Language) -> Self {
        Self { db, default_language }
    }

    /// Upserts the guild row. Returns `true` on first contact.
    pub async fn ensure_guild(&self, guild_id: GuildId) -> StoreResult<bool> {
        self.db
            .run_blocking(move |db| db.insert_guild(&Guild::new(guild_id)).or_no_affect())
            .await
    }

    pub async fn guild(&self, guild_id: GuildId) -> StoreResult<Guild> {
        self.db
            .run_blocking(move |db| {
                db.insert_guild(&Guild::new(guild_id)).or_no_affect()?;
                db.guild(guild_id)
            })
            .await
    }

    pub async fn update_guild(&self, guild: Guild) -> StoreResult<()> {
        self.db
            .run_blocking(move |db| db.update_guild(&guild))
            .await
    }

    /// The stored channel, created with the default language on first touch.
    pub async fn resolve(&self, guild_id: GuildId, channel_id: ChannelId) -> StoreResult<Channel> {
        let language = self.default_language;
        self.db
            .run_blocking(move |db| {
                if let Some(channel) = db.channel(guild_id, channel_id).optional()? {
                    return Ok(channel);
                }

                db.insert_guild(&Guild::new(guild_id)).or_no_affect()?;
                if db
                    .insert_channel(&Channel::new(guild_id, channel_id, language))
                    .or_no_affect()?
                {
                    debug!(guild = %guild_id, channel = %channel_id, %language, "Registered channel");
                }
                db.channel(guild_id, channel_id)
            })
            .await
    }

    /// The group containing the channel, or `None` when it is not linked.
    pub async fn group(&self, guild_id: GuildId, channel_id: ChannelId) -> StoreResult<Option<ChannelGroup>> {
        self.db
            .run_blocking(move |db| db.channel_group(guild_id, channel_id).optional())
            .await
    }

    /// Links two channels.
    ///
    /// Two ungrouped channels form a new group; a channel joins the other side's
    /// group when only one side is grouped. Channels already in two different groups
    /// are never merged. A group holds at most one channel per language.
    pub async fn link(
        &self,
        guild_id: GuildId,
        a: (ChannelId, ChannelKind),
        b: (ChannelId, ChannelKind),
    ) -> Result<ChannelGroup, RegistryError> {
        if a.0 == b.0 {
            return Err(RegistryError::SameChannel);
        }
        if a.1 != b.1 {
            return Err(RegistryError::IncompatibleKinds);
        }

        let a = self.resolve(guild_id, a.0).await?;
        let b = self.resolve(guild_id, b.0).await?;

        let group = self
            .db
            .run_blocking(move |db| {
                let a_group = db.channel_group(guild_id, a.id).optional()?;
                let b_group = db.channel_group(guild_id, b.id).optional()?;

                // A concurrent link may group one side between these reads and the
                // write; the store then reports NoAffect.
                match (a_group, b_group) {
                    (None, None) if a.language == b.language => {
                        Ok(Err(RegistryError::LanguageConflict(a.language)))
                    }
                    (None, None) => grouped(db.insert_channel_group(guild_id, &[a, b])),
                    (Some(group), None) => join(db, group, &b),
                    (None, Some(group)) => join(db, group, &a),
                    (Some(a_group), Some(b_group)) if a_group.id == b_group.id => Ok(Ok(a_group)),
                    (Some(_), Some(_)) => Ok(Err(RegistryError::AlreadyGrouped)),
                }
            })
            .await??;

        info!(guild = %guild_id, group = group.id, members = group.len(), "Linked channels");
        Ok(group)
    }

    /// Changes a channel's language, keeping languages unique within its group.
    pub async fn set_language(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        language: Language,
    ) -> Result<Channel, RegistryError> {
        let mut channel = self.resolve(guild_id, channel_id).await?;
        if channel.language == language {
            return Ok(channel);
        }

        if let Some(group) = self.group(guild_id, channel_id).await? {
            if group.others(channel_id).any(|c| c.language == language) {
                return Err(RegistryError::LanguageConflict(language));
            }
        }

        channel.language = language;
        let updated = channel.clone();
        self.db
            .run_blocking(move |db| db.update_channel(&updated))
            .await?;
        Ok(channel)
    }

    /// Takes the channel out of its group. Returns what is left of the group, if
    /// anything; groups below two members are dissolved.
    pub async fn unlink(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Option<ChannelGroup>, RegistryError> {
        match self
            .db
            .run_blocking(move |db| db.remove_group_member(guild_id, channel_id))
            .await
        {
            Ok(remaining) => {
                info!(guild = %guild_id, channel = %channel_id, dissolved = remaining.is_none(), "Unlinked channel");
                Ok(remaining)
            }
            Err(StoreError::NoAffect) => Err(RegistryError::NotGrouped),
            Err(e) => Err(e.into()),
        }
    }

    /// Records a channel with a known language. Returns `false` when it already existed.
    pub async fn register(&self, channel: Channel) -> StoreResult<bool> {
        self.db
            .run_blocking(move |db| {
                db.insert_guild(&Guild::new(channel.guild_id)).or_no_affect()?;
                db.insert_channel(&channel).or_no_affect()
            })
            .await
    }

    pub async fn update_channel(&self, channel: Channel) -> StoreResult<()> {
        self.db.run_blocking(move |db| db.update_channel(&channel)).await
    }

    /// Groups already-registered, ungrouped channels together.
    pub async fn create_group(&self, guild_id: GuildId, channels: Vec<Channel>) -> StoreResult<ChannelGroup> {
        self.db
            .run_blocking(move |db| db.insert_channel_group(guild_id, &channels))
            .await
    }

    pub async fn count_messages(&self, guild_id: GuildId, channel_id: ChannelId) -> StoreResult<usize> {
        self.db
            .run_blocking(move |db| db.count_messages_in_channel(guild_id, channel_id))
            .await
    }
}

/// Appends `channel` to `group` unless its language is already taken there.
fn join(db: &Database, group: ChannelGroup, channel: &Channel) -> StoreResult<Result<ChannelGroup, RegistryError>> {
    if group.channels.iter().any(|c| c.language == channel.language) {
        return Ok(Err(RegistryError::LanguageConflict(channel.language)));
    }
    grouped(db.add_group_member(group.id, channel))
}

fn grouped(result: StoreResult<ChannelGroup>) -> StoreResult<Result<ChannelGroup, RegistryError>> {
    match result {
        Ok(group) => Ok(Ok(group)),
        Err(StoreError::NoAffect) => Ok(Err(RegistryError::AlreadyGrouped)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild_id() -> GuildId {
        GuildId::new(1)
    }

    fn registry() -> ChannelRegistry {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        ChannelRegistry::new(db, Language::En)
    }

    fn text(id: u64) -> (ChannelId, ChannelKind) {
        (ChannelId::new(id), ChannelKind::Text)
    }

    async fn with_language(registry: &ChannelRegistry, id: u64, language: Language) -> ChannelId {
        let channel_id = ChannelId::new(id);
        registry.set_language(guild_id(), channel_id, language).await.unwrap();
        channel_id
    }

    #[tokio::test]
    async fn test_resolve_creates_with_default_language() {
        let registry = registry();
        let channel = registry.resolve(guild_id(), ChannelId::new(10)).await.unwrap();
        assert_eq!(channel.language, Language::En);

        // Second resolve returns the stored row instead of inserting again.
        let again = registry.resolve(guild_id(), ChannelId::new(10)).await.unwrap();
        assert_eq!(again, channel);
        assert!(registry.group(guild_id(), channel.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_link_creates_then_appends() {
        let registry = registry();
        let a = with_language(&registry, 10, Language::En).await;
        let b = with_language(&registry, 20, Language::Pt).await;
        let c = with_language(&registry, 30, Language::Es).await;

        let group = registry.link(guild_id(), text(10), text(20)).await.unwrap();
        assert_eq!(group.len(), 2);

        let group = registry.link(guild_id(), text(30), text(20)).await.unwrap();
        assert_eq!(group.len(), 3);
        for id in [a, b, c] {
            assert!(group.contains(id));
        }

        // Linking two members of the same group is a no-op.
        let same = registry.link(guild_id(), text(10), text(30)).await.unwrap();
        assert_eq!(same.id, group.id);
    }

    #[tokio::test]
    async fn test_link_preconditions() {
        let registry = registry();
        assert!(matches!(
            registry.link(guild_id(), text(10), text(10)).await,
            Err(RegistryError::SameChannel)
        ));
        assert!(matches!(
            registry
                .link(guild_id(), text(10), (ChannelId::new(20), ChannelKind::Thread))
                .await,
            Err(RegistryError::IncompatibleKinds)
        ));
        // Both default to English.
        assert!(matches!(
            registry.link(guild_id(), text(10), text(20)).await,
            Err(RegistryError::LanguageConflict(Language::En))
        ));
    }

    #[tokio::test]
    async fn test_merging_two_groups_fails_and_mutates_nothing() {
        let registry = registry();
        with_language(&registry, 10, Language::En).await;
        with_language(&registry, 20, Language::Pt).await;
        with_language(&registry, 30, Language::Es).await;
        with_language(&registry, 40, Language::Fr).await;

        let first = registry.link(guild_id(), text(10), text(20)).await.unwrap();
        let second = registry.link(guild_id(), text(30), text(40)).await.unwrap();

        assert!(matches!(
            registry.link(guild_id(), text(20), text(30)).await,
            Err(RegistryError::AlreadyGrouped)
        ));

        let first_after = registry.group(guild_id(), ChannelId::new(10)).await.unwrap().unwrap();
        let second_after = registry.group(guild_id(), ChannelId::new(40)).await.unwrap().unwrap();
        assert_eq!(first_after, first);
        assert_eq!(second_after, second);
    }

    #[tokio::test]
    async fn test_set_language_keeps_group_languages_unique() {
        let registry = registry();
        with_language(&registry, 10, Language::En).await;
        with_language(&registry, 20, Language::Pt).await;
        registry.link(guild_id(), text(10), text(20)).await.unwrap();

        assert!(matches!(
            registry.set_language(guild_id(), ChannelId::new(20), Language::En).await,
            Err(RegistryError::LanguageConflict(Language::En))
        ));

        let channel = registry
            .set_language(guild_id(), ChannelId::new(20), Language::De)
            .await
            .unwrap();
        assert_eq!(channel.language, Language::De);
    }

    #[tokio::test]
    async fn test_unlink_dissolves_pairs() {
        let registry = registry();
        with_language(&registry, 10, Language::En).await;
        with_language(&registry, 20, Language::Pt).await;
        registry.link(guild_id(), text(10), text(20)).await.unwrap();

        assert!(registry.unlink(guild_id(), ChannelId::new(10)).await.unwrap().is_none());
        assert!(registry.group(guild_id(), ChannelId::new(20)).await.unwrap().is_none());
        assert!(matches!(
            registry.unlink(guild_id(), ChannelId::new(20)).await,
            Err(RegistryError::NotGrouped)
        ));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = registry();
        let thread = Channel::new(guild_id(), ChannelId::new(55), Language::Ja);
        assert!(registry.register(thread.clone()).await.unwrap());
        assert!(!registry.register(thread).await.unwrap());
    }
}
