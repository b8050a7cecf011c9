//! The error type every relay handler returns.
//!
//! A [`RelayError`] carries a kind, a message, structured context fields and an
//! optional source. It knows how to deliver itself: to the log (and the guild's
//! logging channel), as a reply to the message that triggered it, or as a notice
//! in an arbitrary channel. Fan-out failures are folded into one error with
//! [`RelayError::aggregate`].

use crate::db::{LogLevel, StoreError};
use crate::event_context::EventContext;
use crate::platform::{Platform, PlatformError};
use crate::registry::RegistryError;
use crate::translator::TranslateError;
use poise::serenity_prelude::{ChannelId, MessageId};
use std::error::Error as StdError;
use std::fmt;
use tracing::{debug, error, warn};

/// Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    /// Already done.
    NoAffect,
    /// Nothing to do.
    NotFound,
    /// A referenced channel or guild is missing.
    PreconditionFailed,
    Internal,
}

impl ErrorKind {
    fn log_level(self) -> LogLevel {
        match self {
            ErrorKind::NoAffect | ErrorKind::NotFound => LogLevel::Debug,
            ErrorKind::PreconditionFailed => LogLevel::Warn,
            ErrorKind::Internal => LogLevel::Error,
        }
    }

    /// Whether users should hear about it.
    fn is_reportable(self) -> bool {
        self >= ErrorKind::PreconditionFailed
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}{}", context(.fields, .source))]
pub struct RelayError {
    kind: ErrorKind,
    message: String,
    fields: Vec<(&'static str, String)>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
    causes: Vec<RelayError>,
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: Vec::new(),
            source: None,
            causes: Vec::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attaches a context field such as the target channel.
    pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    pub fn caused_by(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Folds per-target failures into one error whose kind is the most severe of
    /// them. `None` when nothing failed.
    pub fn aggregate(message: impl Into<String>, causes: Vec<RelayError>) -> Option<Self> {
        let kind = causes.iter().map(|c| c.kind).max()?;
        let mut error = Self::new(kind, message).field("failures", causes.len());
        error.causes = causes;
        Some(error)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn causes(&self) -> &[RelayError] {
        &self.causes
    }

    pub fn field_value(&self, key: &str) -> Option<&str> {
        field(&self.fields, key)
    }

    fn render_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Logs the error and each aggregated cause at a level matching its kind, and
    /// forwards them to the guild's logging channel.
    pub fn log(&self, cx: &EventContext) {
        let _entered = cx.span.enter();
        self.log_one(cx);
        for cause in &self.causes {
            cause.log(cx);
        }
    }

    fn log_one(&self, cx: &EventContext) {
        let fields = self.render_fields();
        let source = self.source.as_ref().map(|s| s.to_string()).unwrap_or_default();
        match self.kind.log_level() {
            LogLevel::Debug | LogLevel::Info => {
                debug!(guild = %cx.guild_id(), %fields, %source, "{}", self.message)
            }
            LogLevel::Warn => warn!(guild = %cx.guild_id(), %fields, %source, "{}", self.message),
            LogLevel::Error => error!(guild = %cx.guild_id(), %fields, %source, "{}", self.message),
        }

        cx.report(self.kind.log_level(), format!("{} ({})", self, fields));
    }

    /// Human-readable notice for the channel the failure concerns.
    pub fn notice(&self) -> String {
        let mut notice = format!("⚠️ {}", self.message);
        for cause in &self.causes {
            notice.push_str(&format!("\n- {}", cause));
        }
        notice
    }

    /// Best-effort reply to the message that triggered the failure.
    pub async fn notify_origin(&self, platform: &dyn Platform, channel_id: ChannelId, message_id: MessageId) {
        self.notify(platform, channel_id, Some(message_id)).await
    }

    /// Best-effort notice in any channel.
    pub async fn notify_channel(&self, platform: &dyn Platform, channel_id: ChannelId) {
        self.notify(platform, channel_id, None).await
    }

    async fn notify(&self, platform: &dyn Platform, channel_id: ChannelId, reply_to: Option<MessageId>) {
        if !self.kind.is_reportable() {
            return;
        }
        if let Err(e) = platform.send_notice(channel_id, reply_to, &self.notice()).await {
            warn!(channel = %channel_id, error = %e, "Failed to post error notice");
        }
    }
}

fn field<'a>(fields: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
}

/// The target channel and the source, appended to the message.
fn context(fields: &[(&'static str, String)], source: &Option<Box<dyn StdError + Send + Sync>>) -> String {
    let mut context = String::new();
    if let Some(target) = field(fields, "target") {
        context.push_str(&format!(" in <#{}>", target));
    }
    if let Some(source) = source {
        context.push_str(&format!(": {}", source));
    }
    context
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        let kind = match e {
            StoreError::NotFound => ErrorKind::NotFound,
            StoreError::NoAffect => ErrorKind::NoAffect,
            StoreError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            _ => ErrorKind::Internal,
        };
        RelayError::new(kind, "database operation failed").caused_by(e)
    }
}

impl From<PlatformError> for RelayError {
    fn from(e: PlatformError) -> Self {
        RelayError::internal("platform request failed").caused_by(e)
    }
}

impl From<TranslateError> for RelayError {
    fn from(e: TranslateError) -> Self {
        RelayError::internal("translation failed").caused_by(e)
    }
}

impl From<RegistryError> for RelayError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Store(e) => e.into(),
            e => RelayError::new(ErrorKind::PreconditionFailed, e.to_string()),
        }
    }
}
