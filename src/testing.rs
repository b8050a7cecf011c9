//! In-memory collaborators for tests.

use crate::db::{Channel, Database, Guild};
use crate::lang::Language;
use crate::platform::{
    Author, ChannelInfo, ChannelKind, IncomingMessage, Platform, PlatformError, PlatformResult, ProxyEndpoint,
    ThreadTemplate,
};
use crate::translator::{TranslateError, TranslateResult, Translator};
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, UserId, WebhookId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub fn guild_id() -> GuildId {
    GuildId::new(1)
}

pub fn author(id: u64, name: &str) -> Author {
    Author {
        id: UserId::new(id),
        display_name: name.to_string(),
        avatar_url: None,
        bot: false,
    }
}

pub fn incoming(channel: u64, id: u64, content: &str) -> IncomingMessage {
    IncomingMessage {
        guild_id: guild_id(),
        channel_id: ChannelId::new(channel),
        id: MessageId::new(id),
        author: author(7, "alice"),
        content: content.to_string(),
    }
}

/// An initialised in-memory database with the test guild and the given channels.
pub fn database(channels: &[(u64, Language)]) -> Database {
    let db = Database::new(":memory:").unwrap();
    db.execute_init().unwrap();
    db.insert_guild(&Guild::new(guild_id())).unwrap();
    for (id, language) in channels {
        db.insert_channel(&Channel::new(guild_id(), ChannelId::new(*id), *language))
            .unwrap();
    }
    db
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub channel_id: ChannelId,
    pub thread: Option<ChannelId>,
    pub id: MessageId,
    pub author: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edited {
    pub thread: Option<ChannelId>,
    pub id: MessageId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartedThread {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub thread_id: ChannelId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub channel_id: ChannelId,
    pub reply_to: Option<MessageId>,
    pub content: String,
}

#[derive(Default)]
struct State {
    channels: HashMap<ChannelId, ChannelInfo>,
    endpoints: Vec<ProxyEndpoint>,
    history: HashMap<ChannelId, Vec<IncomingMessage>>,
    sent: Vec<Sent>,
    edited: Vec<Edited>,
    deleted: Vec<(ChannelId, MessageId)>,
    threads: Vec<StartedThread>,
    notices: Vec<Notice>,
    failing: HashSet<ChannelId>,
    endpoint_creations: usize,
}

/// Records every side effect instead of talking to a chat service.
///
/// Unknown channels are reported as text channels. Posting into a channel marked
/// with [`FakePlatform::fail_channel`] fails.
pub struct FakePlatform {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicU64::new(1_000_000),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn add_thread(&self, thread: ChannelId, parent: ChannelId, name: &str) {
        self.state.lock().unwrap().channels.insert(
            thread,
            ChannelInfo {
                id: thread,
                parent_id: Some(parent),
                kind: ChannelKind::Thread,
                thread: Some(ThreadTemplate {
                    name: name.to_string(),
                    auto_archive_minutes: Some(1440),
                    rate_limit_per_user: None,
                }),
            },
        );
    }

    pub fn add_history(&self, message: IncomingMessage) {
        self.state
            .lock()
            .unwrap()
            .history
            .entry(message.channel_id)
            .or_default()
            .push(message);
    }

    pub fn fail_channel(&self, channel_id: ChannelId) {
        self.state.lock().unwrap().failing.insert(channel_id);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn edited(&self) -> Vec<Edited> {
        self.state.lock().unwrap().edited.clone()
    }

    pub fn deleted(&self) -> Vec<(ChannelId, MessageId)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn threads(&self) -> Vec<StartedThread> {
        self.state.lock().unwrap().threads.clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.state.lock().unwrap().notices.clone()
    }

    pub fn endpoint_creations(&self) -> usize {
        self.state.lock().unwrap().endpoint_creations
    }

    pub fn endpoint_count(&self) -> usize {
        self.state.lock().unwrap().endpoints.len()
    }
}

fn rejected(context: &str) -> PlatformError {
    PlatformError::Unexpected(format!("{} rejected by fake platform", context))
}

#[async_trait]
impl Platform for FakePlatform {
    async fn channel(&self, channel_id: ChannelId) -> PlatformResult<ChannelInfo> {
        let state = self.state.lock().unwrap();
        Ok(state.channels.get(&channel_id).cloned().unwrap_or(ChannelInfo {
            id: channel_id,
            parent_id: None,
            kind: ChannelKind::Text,
            thread: None,
        }))
    }

    async fn endpoints(&self, channel_id: ChannelId) -> PlatformResult<Vec<ProxyEndpoint>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .endpoints
            .iter()
            .filter(|e| e.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn create_endpoint(&self, channel_id: ChannelId, name: &str) -> PlatformResult<ProxyEndpoint> {
        let endpoint = ProxyEndpoint {
            id: WebhookId::new(self.next_id()),
            channel_id,
            name: name.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        state.endpoint_creations += 1;
        state.endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn delete_endpoint(&self, endpoint: &ProxyEndpoint) -> PlatformResult<()> {
        self.state.lock().unwrap().endpoints.retain(|e| e.id != endpoint.id);
        Ok(())
    }

    async fn execute_endpoint(
        &self,
        endpoint: &ProxyEndpoint,
        thread: Option<ChannelId>,
        author: &Author,
        content: &str,
    ) -> PlatformResult<MessageId> {
        let id = MessageId::new(self.next_id());
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&endpoint.channel_id) || thread.is_some_and(|t| state.failing.contains(&t)) {
            return Err(rejected("post"));
        }
        if !state.endpoints.iter().any(|e| e.id == endpoint.id) {
            return Err(rejected("unknown endpoint"));
        }
        state.sent.push(Sent {
            channel_id: endpoint.channel_id,
            thread,
            id,
            author: author.display_name.clone(),
            content: content.to_string(),
        });
        Ok(id)
    }

    async fn edit_endpoint_message(
        &self,
        endpoint: &ProxyEndpoint,
        thread: Option<ChannelId>,
        message_id: MessageId,
        content: &str,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&endpoint.channel_id) {
            return Err(rejected("edit"));
        }
        state.edited.push(Edited {
            thread,
            id: message_id,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&channel_id) {
            return Err(rejected("delete"));
        }
        state.deleted.push((channel_id, message_id));
        Ok(())
    }

    async fn start_thread(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        template: &ThreadTemplate,
    ) -> PlatformResult<ChannelId> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&channel_id) {
            return Err(rejected("thread"));
        }
        // Threads started from a message share its id.
        let thread_id = ChannelId::new(message_id.get());
        state.channels.insert(
            thread_id,
            ChannelInfo {
                id: thread_id,
                parent_id: Some(channel_id),
                kind: ChannelKind::Thread,
                thread: Some(template.clone()),
            },
        );
        state.threads.push(StartedThread {
            channel_id,
            message_id,
            thread_id,
            name: template.name.clone(),
        });
        Ok(thread_id)
    }

    async fn first_messages(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
        limit: u8,
    ) -> PlatformResult<Vec<IncomingMessage>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .history
            .get(&channel_id)
            .map(|messages| messages.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_notice(&self, channel_id: ChannelId, reply_to: Option<MessageId>, content: &str) -> PlatformResult<()> {
        self.state.lock().unwrap().notices.push(Notice {
            channel_id,
            reply_to,
            content: content.to_string(),
        });
        Ok(())
    }
}

/// Prefixes the text with the target language code, e.g. `[pt] Hello`.
#[derive(Default)]
pub struct TaggingTranslator {
    failing: Mutex<HashSet<Language>>,
}

impl TaggingTranslator {
    pub fn fail_into(&self, language: Language) {
        self.failing.lock().unwrap().insert(language);
    }
}

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, _from: Language, to: Language, text: &str) -> TranslateResult<String> {
        if self.failing.lock().unwrap().contains(&to) {
            return Err(TranslateError::Request(format!("no model for {}", to)));
        }
        Ok(format!("[{}] {}", to, text))
    }

    async fn detect(&self, _text: &str) -> TranslateResult<Language> {
        Ok(Language::En)
    }
}
