use crate::locks::KeyedLocks;
use crate::platform::{Author, ChannelInfo, Platform, PlatformResult, ProxyEndpoint};
use lru::LruCache;
use poise::serenity_prelude::{ChannelId, MessageId, UserId};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

type EndpointKey = (ChannelId, UserId);

/// Posts content under an author's name and avatar through per-(channel, author)
/// endpoints.
///
/// Endpoints are named deterministically from the author id, so an existing one is
/// found again after a restart. Threads post through their parent channel's
/// endpoints.
pub struct IdentityProxy {
    platform: Arc<dyn Platform>,
    cache: Mutex<LruCache<EndpointKey, ProxyEndpoint>>,
    locks: KeyedLocks<EndpointKey>,
    prefix: String,
}

impl IdentityProxy {
    pub fn new(platform: Arc<dyn Platform>, capacity: usize, prefix: impl Into<String>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            platform,
            cache: Mutex::new(LruCache::new(capacity)),
            locks: KeyedLocks::new(),
            prefix: prefix.into(),
        }
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<EndpointKey, ProxyEndpoint>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn endpoint_name(&self, author: UserId) -> String {
        format!("{}{}", self.prefix, author)
    }

    /// Finds or creates the endpoint for `author` in `target`.
    ///
    /// Concurrent callers for the same pair in this process wait on each other.
    /// A create racing with another process is settled by re-listing and keeping
    /// the newest endpoint with the name.
    pub async fn endpoint_for(&self, target: &ChannelInfo, author: &Author) -> PlatformResult<ProxyEndpoint> {
        let home = target.endpoint_home();
        let key = (home, author.id);

        if let Some(endpoint) = self.cache().get(&key).cloned() {
            return Ok(endpoint);
        }

        let _guard = self.locks.lock(key).await;
        if let Some(endpoint) = self.cache().get(&key).cloned() {
            return Ok(endpoint);
        }

        let name = self.endpoint_name(author.id);
        let endpoint = match self.find(home, &name).await? {
            Some(endpoint) => endpoint,
            None => {
                let created = self.platform.create_endpoint(home, &name).await?;
                debug!(channel = %home, endpoint = %created.id, %name, "Created proxy endpoint");
                self.settle(home, &name, created).await?
            }
        };

        self.cache().put(key, endpoint.clone());
        Ok(endpoint)
    }

    async fn find(&self, channel_id: ChannelId, name: &str) -> PlatformResult<Option<ProxyEndpoint>> {
        Ok(self
            .platform
            .endpoints(channel_id)
            .await?
            .into_iter()
            .filter(|e| e.name == name)
            .max_by_key(|e| e.id))
    }

    async fn settle(&self, channel_id: ChannelId, name: &str, created: ProxyEndpoint) -> PlatformResult<ProxyEndpoint> {
        let winner = match self.find(channel_id, name).await? {
            Some(winner) if winner.id != created.id => winner,
            _ => return Ok(created),
        };

        debug!(channel = %channel_id, kept = %winner.id, dropped = %created.id, "Proxy endpoint created concurrently");
        if let Err(e) = self.platform.delete_endpoint(&created).await {
            warn!(endpoint = %created.id, error = %e, "Failed to delete duplicate proxy endpoint");
        }
        Ok(winner)
    }

    /// Drops every cached reference to `endpoint`.
    pub fn forget(&self, endpoint: &ProxyEndpoint) {
        let mut cache = self.cache();
        let stale: Vec<EndpointKey> = cache
            .iter()
            .filter(|(_, cached)| cached.id == endpoint.id)
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    pub async fn post_as(&self, endpoint: &ProxyEndpoint, author: &Author, content: &str) -> PlatformResult<MessageId> {
        self.execute(endpoint, None, author, content).await
    }

    pub async fn post_as_in_thread(
        &self,
        endpoint: &ProxyEndpoint,
        thread: ChannelId,
        author: &Author,
        content: &str,
    ) -> PlatformResult<MessageId> {
        self.execute(endpoint, Some(thread), author, content).await
    }

    async fn execute(
        &self,
        endpoint: &ProxyEndpoint,
        thread: Option<ChannelId>,
        author: &Author,
        content: &str,
    ) -> PlatformResult<MessageId> {
        self.platform
            .execute_endpoint(endpoint, thread, author, content)
            .await
            .inspect_err(|_| self.forget(endpoint))
    }

    /// Edits a message previously posted through `endpoint`.
    pub async fn edit_as(
        &self,
        endpoint: &ProxyEndpoint,
        thread: Option<ChannelId>,
        message_id: MessageId,
        content: &str,
    ) -> PlatformResult<()> {
        self.platform
            .edit_endpoint_message(endpoint, thread, message_id, content)
            .await
            .inspect_err(|_| self.forget(endpoint))
    }

    /// Resolves the endpoint for `target` and posts there, inside the thread when
    /// `target` is one.
    pub async fn deliver(&self, target: &ChannelInfo, author: &Author, content: &str) -> PlatformResult<MessageId> {
        let endpoint = self.endpoint_for(target, author).await?;
        match target.thread_id() {
            Some(thread) => self.post_as_in_thread(&endpoint, thread, author, content).await,
            None => self.post_as(&endpoint, author, content).await,
        }
    }
}
