//! Create, update and delete propagation across a channel group.
//!
//! Every handler follows the same steps: resolve the channel and its group,
//! resolve or record the ledger rows, fan out to the other members concurrently,
//! then fold the per-target failures into one [`RelayError`].
//!
//! Each handler locks the message it was called for before reading anything,
//! then that message's origin when it is a different message. Events for one
//! conversation never interleave, and a replayed Create sees the rows the first
//! one recorded. Arrival order itself comes from the event table, which queues
//! events per channel.

use crate::config::DISCORD_MESSAGE_LIMIT;
use crate::db::{Channel, Message};
use crate::error::{RelayError, RelayResult};
use crate::event_context::EventContext;
use crate::lang::Language;
use crate::ledger::MessageLedger;
use crate::locks::KeyedLocks;
use crate::platform::{Author, IncomingMessage, Platform};
use crate::proxy::IdentityProxy;
use crate::registry::ChannelRegistry;
use crate::translator::Translator;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinSet;
use tracing::{debug, debug_span, warn, Instrument};

#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) registry: ChannelRegistry,
    pub(crate) ledger: MessageLedger,
    pub(crate) platform: Arc<dyn Platform>,
    proxy: Arc<IdentityProxy>,
    translator: Arc<dyn Translator>,
    origins: Arc<KeyedLocks<(ChannelId, MessageId)>>,
}

impl Dispatcher {
    pub fn new(
        registry: ChannelRegistry,
        ledger: MessageLedger,
        proxy: Arc<IdentityProxy>,
        translator: Arc<dyn Translator>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            registry,
            ledger,
            platform,
            proxy,
            translator,
            origins: Arc::new(KeyedLocks::new()),
        }
    }

    /// Serialises handling of one origin message.
    pub(crate) async fn lock_origin(&self, origin: &Message) -> OwnedMutexGuard<()> {
        self.origins.lock(origin.key()).await
    }

    /// Locks the origin of `row` when it is another message. A message's own lock
    /// is always taken before its origin's.
    async fn lock_origin_of(&self, row: &Message, origin: &Message) -> Option<OwnedMutexGuard<()>> {
        if origin.key() == row.key() {
            return None;
        }
        Some(self.lock_origin(origin).await)
    }

    pub(crate) async fn translate(&self, from: Language, to: Language, text: &str) -> RelayResult<String> {
        if from == to {
            return Ok(text.to_string());
        }
        let translated = self.translator.translate(from, to, text).await?;
        Ok(fit_message(translated))
    }

    /// Relays a new message to every other channel of its group.
    pub async fn on_create(&self, cx: &EventContext, msg: &IncomingMessage) -> RelayResult<()> {
        if msg.content.trim().is_empty() {
            return Ok(());
        }

        let _guard = self.origins.lock((msg.channel_id, msg.id)).await;
        let channel = self.registry.resolve(msg.guild_id, msg.channel_id).await?;
        let Some(group) = self.registry.group(msg.guild_id, msg.channel_id).await? else {
            debug!(channel = %msg.channel_id, "Channel is not linked, nothing to relay");
            return Ok(());
        };

        let origin = self
            .ledger
            .get_or_create_origin(msg.guild_id, msg.channel_id, msg.id, channel.language)
            .await?;
        if !origin.is_origin() {
            debug!(message = %msg.id, "Message is a relayed copy, not relaying it again");
            return Ok(());
        }

        let from = channel.language;
        let mut tasks = JoinSet::new();
        for target in group.others(channel.id).cloned() {
            let this = self.clone();
            let origin = origin.clone();
            let msg = msg.clone();
            spawn_for_target(&mut tasks, target.id, async move {
                this.relay_create(&origin, from, &target, &msg).await
            });
        }

        let (_, failures) = join_targets(tasks).await;
        match RelayError::aggregate("could not relay message to every linked channel", failures) {
            Some(error) => Err(error.field("channel", msg.channel_id).field("message", msg.id)),
            None => {
                debug!(guild = %cx.guild_id(), message = %msg.id, targets = group.len() - 1, "Relayed message");
                Ok(())
            }
        }
    }

    async fn relay_create(
        &self,
        origin: &Message,
        from: Language,
        target: &Channel,
        msg: &IncomingMessage,
    ) -> RelayResult<()> {
        if let Some(existing) = self.ledger.derived_in_language(origin, target.language).await? {
            debug!(copy = %existing.id, "Already relayed, skipping");
            return Ok(());
        }

        let info = self.platform.channel(target.id).await?;
        let content = self.translate(from, target.language, &msg.content).await?;
        let sent = self.proxy.deliver(&info, &msg.author, &content).await?;

        self.ledger
            .get_or_create_derived(target.id, sent, target.language, origin)
            .await?;
        Ok(())
    }

    /// Re-translates an edited message into every copy of it.
    pub async fn on_update(&self, cx: &EventContext, msg: &IncomingMessage) -> RelayResult<()> {
        let _own = self.origins.lock((msg.channel_id, msg.id)).await;
        let Some(row) = self.ledger.find(msg.guild_id, msg.channel_id, msg.id).await? else {
            debug!(message = %msg.id, "Edited message is not tracked");
            return Ok(());
        };
        if msg.content.trim().is_empty() {
            return Ok(());
        }

        let origin = self.ledger.resolve_canonical_origin(&row).await?;
        let _origin = self.lock_origin_of(&row, &origin).await;
        let siblings = self.ledger.siblings_of(&origin).await?;

        let mut tasks = JoinSet::new();
        for sibling in siblings.into_iter().filter(|s| s.key() != row.key()) {
            let this = self.clone();
            let msg = msg.clone();
            let from = row.language;
            spawn_for_target(&mut tasks, sibling.channel_id, async move {
                this.relay_update(&sibling, from, &msg.author, &msg.content).await
            });
        }

        let (_, failures) = join_targets(tasks).await;
        match RelayError::aggregate("could not update every copy of the message", failures) {
            Some(error) => Err(error.field("channel", msg.channel_id).field("message", msg.id)),
            None => {
                debug!(guild = %cx.guild_id(), message = %msg.id, "Propagated edit");
                Ok(())
            }
        }
    }

    async fn relay_update(&self, copy: &Message, from: Language, author: &Author, text: &str) -> RelayResult<()> {
        let info = self.platform.channel(copy.channel_id).await?;
        let content = self.translate(from, copy.language, text).await?;
        let endpoint = self.proxy.endpoint_for(&info, author).await?;
        self.proxy
            .edit_as(&endpoint, info.thread_id(), copy.id, &content)
            .await?;
        Ok(())
    }

    /// Deletes the whole translated family of a deleted message.
    ///
    /// Derived rows go first; the origin row is only removed once all of them are,
    /// so an interrupted cascade can be retried from the origin.
    pub async fn on_delete(
        &self,
        cx: &EventContext,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> RelayResult<()> {
        let _own = self.origins.lock((channel_id, message_id)).await;
        let Some(row) = self.ledger.find(guild_id, channel_id, message_id).await? else {
            debug!(message = %message_id, "Deleted message is not tracked");
            return Ok(());
        };

        let origin = self.ledger.resolve_canonical_origin(&row).await?;
        let _origin = self.lock_origin_of(&row, &origin).await;

        // Deletions made by an earlier cascade arrive here as events of their own.
        if self.ledger.find(guild_id, channel_id, message_id).await?.is_none() {
            debug!(message = %message_id, "Already removed by another cascade");
            return Ok(());
        }

        let siblings = self.ledger.siblings_of(&origin).await?;
        let mut tasks = JoinSet::new();
        for sibling in siblings {
            let this = self.clone();
            let skip_platform = sibling.key() == row.key();
            spawn_for_target(&mut tasks, sibling.channel_id, async move {
                if !skip_platform {
                    this.delete_content(&sibling).await;
                }
                this.ledger.remove(&sibling).await?;
                Ok(())
            });
        }

        let (_, failures) = join_targets(tasks).await;
        if let Some(error) = RelayError::aggregate("could not delete every copy of the message", failures) {
            return Err(error.field("channel", channel_id).field("message", message_id));
        }

        if origin.key() != row.key() {
            self.delete_content(&origin).await;
        }
        self.ledger.remove(&origin).await?;
        debug!(guild = %cx.guild_id(), origin = %origin.id, "Deleted message family");
        Ok(())
    }

    async fn delete_content(&self, message: &Message) {
        if let Err(e) = self.platform.delete_message(message.channel_id, message.id).await {
            warn!(channel = %message.channel_id, message = %message.id, error = %e, "Failed to delete relayed message");
        }
    }
}

/// Spawns one fan-out task whose failure is tagged with its target channel.
pub(crate) fn spawn_for_target<T, F>(tasks: &mut JoinSet<RelayResult<T>>, target: ChannelId, task: F)
where
    T: Send + 'static,
    F: Future<Output = RelayResult<T>> + Send + 'static,
{
    let span = debug_span!("target", target = %target);
    tasks.spawn(
        async move { task.await.map_err(|e| e.field("target", target)) }.instrument(span),
    );
}

/// Waits for every fan-out task. One task failing never cancels the others.
pub(crate) async fn join_targets<T: 'static>(mut tasks: JoinSet<RelayResult<T>>) -> (Vec<T>, Vec<RelayError>) {
    let mut done = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(value)) => done.push(value),
            Ok(Err(e)) => failures.push(e),
            Err(e) => failures.push(RelayError::internal("relay task did not complete").caused_by(e)),
        }
    }
    (done, failures)
}

/// Cuts content down to what a single message can hold.
fn fit_message(content: String) -> String {
    truncate_chars(content, DISCORD_MESSAGE_LIMIT)
}

/// Caps `content` at `limit` characters, marking the cut with an ellipsis.
pub(crate) fn truncate_chars(mut content: String, limit: usize) -> String {
    if content.chars().count() <= limit {
        return content;
    }
    let cut = content
        .char_indices()
        .nth(limit.saturating_sub(1))
        .map(|(idx, _)| idx)
        .unwrap_or(content.len());
    content.truncate(cut);
    content.push('…');
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::platform::ChannelKind;
    use crate::testing::{database, guild_id, incoming, FakePlatform, TaggingTranslator};

    struct Harness {
        db: Database,
        platform: Arc<FakePlatform>,
        translator: Arc<TaggingTranslator>,
        dispatcher: Dispatcher,
        cx: EventContext,
    }

    fn harness(channels: &[(u64, Language)]) -> Harness {
        let db = database(channels);
        let platform = Arc::new(FakePlatform::new());
        let translator = Arc::new(TaggingTranslator::default());
        let registry = ChannelRegistry::new(db.clone(), Language::En);
        let dispatcher = Dispatcher::new(
            registry,
            MessageLedger::new(db.clone()),
            Arc::new(IdentityProxy::new(platform.clone(), 16, "relay-")),
            translator.clone(),
            platform.clone(),
        );
        Harness {
            db,
            platform,
            translator,
            dispatcher,
            cx: EventContext::local(guild_id()),
        }
    }

    impl Harness {
        async fn link(&self, a: u64, b: u64) {
            self.dispatcher
                .registry
                .link(
                    guild_id(),
                    (ChannelId::new(a), ChannelKind::Text),
                    (ChannelId::new(b), ChannelKind::Text),
                )
                .await
                .unwrap();
        }

        fn row(&self, channel: u64, id: MessageId) -> Option<Message> {
            self.db.message(guild_id(), ChannelId::new(channel), id).ok()
        }

        fn count(&self, channel: u64) -> usize {
            self.db.count_messages_in_channel(guild_id(), ChannelId::new(channel)).unwrap()
        }
    }

    #[tokio::test]
    async fn test_unlinked_channel_relays_nothing() {
        let h = harness(&[(10, Language::En), (20, Language::Pt)]);

        h.dispatcher.on_create(&h.cx, &incoming(10, 100, "Hello")).await.unwrap();

        assert!(h.platform.sent().is_empty());
        assert_eq!(h.count(10), 0);
        assert_eq!(h.count(20), 0);
    }

    #[tokio::test]
    async fn test_create_relays_one_copy_per_target() {
        let h = harness(&[(10, Language::En), (20, Language::Pt)]);
        h.link(10, 20).await;

        h.dispatcher.on_create(&h.cx, &incoming(10, 100, "Hello")).await.unwrap();

        let sent = h.platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel_id, ChannelId::new(20));
        assert_eq!(sent[0].content, "[pt] Hello");
        assert_eq!(sent[0].author, "alice");

        let origin = h.row(10, MessageId::new(100)).unwrap();
        assert!(origin.is_origin());
        let derived = h.row(20, sent[0].id).unwrap();
        assert_eq!(derived.language, Language::Pt);
        assert_eq!(derived.origin_ref(), Some((ChannelId::new(10), MessageId::new(100))));
        assert_eq!(h.count(20), 1);
    }

    #[tokio::test]
    async fn test_replayed_create_is_idempotent() {
        let h = harness(&[(10, Language::En), (20, Language::Pt)]);
        h.link(10, 20).await;
        let msg = incoming(10, 100, "Hello");

        h.dispatcher.on_create(&h.cx, &msg).await.unwrap();
        h.dispatcher.on_create(&h.cx, &msg).await.unwrap();

        assert_eq!(h.platform.sent().len(), 1);
        assert_eq!(h.count(10), 1);
        assert_eq!(h.count(20), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_creates_send_once() {
        let h = harness(&[(10, Language::En), (20, Language::Pt), (30, Language::Es)]);
        h.link(10, 20).await;
        h.link(10, 30).await;
        let msg = incoming(10, 100, "Hello");

        let (a, b) = tokio::join!(
            h.dispatcher.on_create(&h.cx, &msg),
            h.dispatcher.on_create(&h.cx, &msg)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(h.platform.sent().len(), 2);
        assert_eq!(h.count(20), 1);
        assert_eq!(h.count(30), 1);
    }

    #[tokio::test]
    async fn test_failed_target_does_not_block_others() {
        let h = harness(&[(10, Language::En), (20, Language::Pt), (30, Language::Es)]);
        h.link(10, 20).await;
        h.link(10, 30).await;
        h.translator.fail_into(Language::Pt);

        let err = h
            .dispatcher
            .on_create(&h.cx, &incoming(10, 100, "Hello"))
            .await
            .unwrap_err();

        assert_eq!(err.causes().len(), 1);
        assert_eq!(err.causes()[0].field_value("target"), Some("20"));

        let sent = h.platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel_id, ChannelId::new(30));
        assert_eq!(h.count(30), 1);
    }

    #[tokio::test]
    async fn test_update_edits_every_copy_only() {
        let h = harness(&[(10, Language::En), (20, Language::Pt), (30, Language::Es), (40, Language::De)]);
        h.link(10, 20).await;
        h.link(10, 30).await;

        h.dispatcher.on_create(&h.cx, &incoming(10, 100, "Hello")).await.unwrap();
        let sent = h.platform.sent();

        h.dispatcher.on_update(&h.cx, &incoming(10, 100, "Hello there")).await.unwrap();

        let mut edited = h.platform.edited();
        edited.sort_by_key(|e| e.content.clone());
        assert_eq!(edited.len(), 2);
        assert_eq!(edited[0].content, "[es] Hello there");
        assert_eq!(edited[1].content, "[pt] Hello there");
        for edit in &edited {
            assert!(sent.iter().any(|s| s.id == edit.id));
        }

        // Untracked messages are ignored.
        h.dispatcher.on_update(&h.cx, &incoming(40, 400, "unrelated")).await.unwrap();
        assert_eq!(h.platform.edited().len(), 2);
        assert_eq!(h.count(40), 0);
    }

    #[tokio::test]
    async fn test_delete_origin_cascades() {
        let h = harness(&[(10, Language::En), (20, Language::Pt), (30, Language::Es)]);
        h.link(10, 20).await;
        h.link(10, 30).await;
        h.dispatcher.on_create(&h.cx, &incoming(10, 100, "Hello")).await.unwrap();

        h.dispatcher
            .on_delete(&h.cx, guild_id(), ChannelId::new(10), MessageId::new(100))
            .await
            .unwrap();

        let deleted = h.platform.deleted();
        assert_eq!(deleted.len(), 2);
        assert!(!deleted.contains(&(ChannelId::new(10), MessageId::new(100))));
        for channel in [10, 20, 30] {
            assert_eq!(h.count(channel), 0);
        }
    }

    #[tokio::test]
    async fn test_delete_copy_resolves_to_origin() {
        let h = harness(&[(10, Language::En), (20, Language::Pt), (30, Language::Es)]);
        h.link(10, 20).await;
        h.link(10, 30).await;
        h.dispatcher.on_create(&h.cx, &incoming(10, 100, "Hello")).await.unwrap();
        let sent = h.platform.sent();
        let copy = sent.iter().find(|s| s.channel_id == ChannelId::new(20)).unwrap();
        let other = sent.iter().find(|s| s.channel_id == ChannelId::new(30)).unwrap();

        h.dispatcher
            .on_delete(&h.cx, guild_id(), ChannelId::new(20), copy.id)
            .await
            .unwrap();

        let deleted = h.platform.deleted();
        assert_eq!(deleted.len(), 2);
        assert!(deleted.contains(&(ChannelId::new(10), MessageId::new(100))));
        assert!(!deleted.contains(&(ChannelId::new(20), copy.id)));
        for channel in [10, 20, 30] {
            assert_eq!(h.count(channel), 0);
        }

        // The echo of our own deletion finds nothing left to do.
        h.dispatcher
            .on_delete(&h.cx, guild_id(), ChannelId::new(30), other.id)
            .await
            .unwrap();
        assert_eq!(h.platform.deleted().len(), 2);
    }

    #[tokio::test]
    async fn test_platform_delete_failure_still_clears_rows() {
        let h = harness(&[(10, Language::En), (20, Language::Pt)]);
        h.link(10, 20).await;
        h.dispatcher.on_create(&h.cx, &incoming(10, 100, "Hello")).await.unwrap();
        h.platform.fail_channel(ChannelId::new(20));

        h.dispatcher
            .on_delete(&h.cx, guild_id(), ChannelId::new(10), MessageId::new(100))
            .await
            .unwrap();
        assert_eq!(h.count(10), 0);
        assert_eq!(h.count(20), 0);
    }

    #[test]
    fn test_fit_message() {
        assert_eq!(fit_message("short".to_string()), "short");

        let long = "é".repeat(DISCORD_MESSAGE_LIMIT + 10);
        let fitted = fit_message(long);
        assert_eq!(fitted.chars().count(), DISCORD_MESSAGE_LIMIT);
        assert!(fitted.ends_with('…'));
    }
}
