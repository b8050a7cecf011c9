use crate::db::{Guild, LogLevel};
use crate::platform::Platform;
use poise::serenity_prelude::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{warn, Span};

const DEFAULT_GUILD_LOG_LEVEL: LogLevel = LogLevel::Info;

/// Everything a handler needs to know about the guild an event belongs to.
///
/// Built once per event and passed down through the dispatcher and the thread
/// mirror.
#[derive(Clone)]
pub struct EventContext {
    pub guild: Guild,
    pub span: Span,
    sink: Option<GuildLogSink>,
}

#[derive(Clone)]
struct GuildLogSink {
    channel_id: ChannelId,
    level: LogLevel,
    platform: Arc<dyn Platform>,
}

impl EventContext {
    pub fn new(guild: Guild, span: Span, platform: Arc<dyn Platform>) -> Self {
        let sink = guild.config.logging_channel.map(|channel_id| GuildLogSink {
            channel_id,
            level: guild.config.logging_level.unwrap_or(DEFAULT_GUILD_LOG_LEVEL),
            platform,
        });

        Self { guild, span, sink }
    }

    /// A context that only logs to tracing.
    #[cfg(test)]
    pub fn local(guild_id: GuildId) -> Self {
        Self {
            guild: Guild::new(guild_id),
            span: Span::current(),
            sink: None,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild.id
    }

    fn forwards(&self, level: LogLevel) -> bool {
        self.sink.as_ref().is_some_and(|sink| level >= sink.level)
    }

    /// Posts a record to the guild's logging channel when its level passes the
    /// guild's threshold. Delivery happens in the background.
    pub fn report(&self, level: LogLevel, text: String) {
        if !self.forwards(level) {
            return;
        }
        let Some(sink) = self.sink.clone() else {
            return;
        };

        let record = format!("`{:?}` {}", level, text);
        tokio::spawn(async move {
            if let Err(e) = sink.platform.send_notice(sink.channel_id, None, &record).await {
                warn!(channel = %sink.channel_id, error = %e, "Failed to forward log record to guild channel");
            }
        });
    }
}
