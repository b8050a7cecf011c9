pub mod error;
pub mod models;
pub mod schema;

pub use error::{IdempotentExt, OptionalExt, StoreError, StoreResult};
pub use models::{Channel, ChannelGroup, Guild, GuildConfig, LogLevel, Message};

use crate::lang::Language;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Durable keyed storage for guilds, channels, channel groups and messages.
///
/// Every insert is an `INSERT OR IGNORE` that reports [`StoreError::NoAffect`] when
/// the row already exists, so concurrent callers never produce duplicates.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(database_url: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open(database_url)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> StoreResult<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs a blocking database closure on the blocking thread pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Guilds ---

    pub fn guild(&self, guild_id: GuildId) -> StoreResult<Guild> {
        let conn = self.conn();
        let config: String = conn
            .query_row(
                "SELECT config FROM guilds WHERE id = ?1",
                [guild_id.to_string()],
                |row| row.get(0),
            )
            .map_err(not_found)?;

        Ok(Guild {
            id: guild_id,
            config: serde_json::from_str(&config)?,
        })
    }

    pub fn insert_guild(&self, guild: &Guild) -> StoreResult<()> {
        let config = serde_json::to_string(&guild.config)?;
        let conn = self.conn();
        let rows = conn.execute(
            "INSERT OR IGNORE INTO guilds (id, config) VALUES (?1, ?2)",
            (guild.id.to_string(), config),
        )?;
        affected(rows)
    }

    pub fn update_guild(&self, guild: &Guild) -> StoreResult<()> {
        let config = serde_json::to_string(&guild.config)?;
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE guilds SET config = ?1 WHERE id = ?2",
            (config, guild.id.to_string()),
        )?;
        affected(rows)
    }

    // --- Channels ---

    pub fn channel(&self, guild_id: GuildId, channel_id: ChannelId) -> StoreResult<Channel> {
        let conn = self.conn();
        conn.query_row(
            "SELECT guild_id, id, language FROM channels WHERE guild_id = ?1 AND id = ?2",
            (guild_id.to_string(), channel_id.to_string()),
            channel_from_row,
        )
        .map_err(not_found)
    }

    /// Requires the owning guild row to exist.
    pub fn insert_channel(&self, channel: &Channel) -> StoreResult<()> {
        let conn = self.conn();
        let guild_exists = conn
            .prepare("SELECT 1 FROM guilds WHERE id = ?1")?
            .exists([channel.guild_id.to_string()])?;
        if !guild_exists {
            return Err(StoreError::PreconditionFailed(format!(
                "guild {} doesn't exist in the database",
                channel.guild_id
            )));
        }

        let rows = conn.execute(
            "INSERT OR IGNORE INTO channels (guild_id, id, language) VALUES (?1, ?2, ?3)",
            (
                channel.guild_id.to_string(),
                channel.id.to_string(),
                channel.language.code(),
            ),
        )?;
        affected(rows)
    }

    pub fn update_channel(&self, channel: &Channel) -> StoreResult<()> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE channels SET language = ?1 WHERE guild_id = ?2 AND id = ?3",
            (
                channel.language.code(),
                channel.guild_id.to_string(),
                channel.id.to_string(),
            ),
        )?;
        affected(rows)
    }

    // --- Channel groups ---

    /// The group containing `channel_id`.
    pub fn channel_group(&self, guild_id: GuildId, channel_id: ChannelId) -> StoreResult<ChannelGroup> {
        let conn = self.conn();
        let group_id: i64 = conn
            .query_row(
                "SELECT group_id FROM channel_group_members WHERE guild_id = ?1 AND channel_id = ?2",
                (guild_id.to_string(), channel_id.to_string()),
                |row| row.get(0),
            )
            .map_err(not_found)?;

        select_group(&conn, guild_id, group_id)
    }

    /// Inserts a new group. Every member must be a stored channel that is not
    /// grouped yet; if any member is already grouped nothing is written.
    pub fn insert_channel_group(&self, guild_id: GuildId, channels: &[Channel]) -> StoreResult<ChannelGroup> {
        if channels.is_empty() {
            return Err(StoreError::NoAffect);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        for channel in channels {
            check_groupable(&tx, guild_id, channel)?;
        }

        tx.execute(
            "INSERT INTO channel_groups (guild_id) VALUES (?1)",
            [guild_id.to_string()],
        )?;
        let group_id = tx.last_insert_rowid();

        for channel in channels {
            tx.execute(
                "INSERT INTO channel_group_members (guild_id, channel_id, group_id) VALUES (?1, ?2, ?3)",
                (guild_id.to_string(), channel.id.to_string(), group_id),
            )?;
        }

        let group = select_group(&tx, guild_id, group_id)?;
        tx.commit()?;
        Ok(group)
    }

    /// Appends a channel to an existing group.
    pub fn add_group_member(&self, group_id: i64, channel: &Channel) -> StoreResult<ChannelGroup> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists = tx
            .prepare("SELECT 1 FROM channel_groups WHERE id = ?1 AND guild_id = ?2")?
            .exists((group_id, channel.guild_id.to_string()))?;
        if !exists {
            return Err(StoreError::NotFound);
        }
        check_groupable(&tx, channel.guild_id, channel)?;

        tx.execute(
            "INSERT INTO channel_group_members (guild_id, channel_id, group_id) VALUES (?1, ?2, ?3)",
            (channel.guild_id.to_string(), channel.id.to_string(), group_id),
        )?;

        let group = select_group(&tx, channel.guild_id, group_id)?;
        tx.commit()?;
        Ok(group)
    }

    /// Removes a channel from its group. Groups left with fewer than two members
    /// are dissolved. Returns the remaining group, if any.
    pub fn remove_group_member(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> StoreResult<Option<ChannelGroup>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let group_id = detach_member(&tx, guild_id, channel_id)?.ok_or(StoreError::NoAffect)?;

        let group = select_group(&tx, guild_id, group_id).optional()?;
        tx.commit()?;
        Ok(group)
    }

    // --- Messages ---

    pub fn message(&self, guild_id: GuildId, channel_id: ChannelId, message_id: MessageId) -> StoreResult<Message> {
        let conn = self.conn();
        conn.query_row(
            "SELECT guild_id, channel_id, id, language, origin_channel_id, origin_id FROM messages
             WHERE guild_id = ?1 AND channel_id = ?2 AND id = ?3",
            (
                guild_id.to_string(),
                channel_id.to_string(),
                message_id.to_string(),
            ),
            message_from_row,
        )
        .map_err(not_found)
    }

    /// Every message derived from the given origin. `NotFound` when there are none.
    pub fn messages_with_origin(
        &self,
        guild_id: GuildId,
        origin_channel_id: ChannelId,
        origin_id: MessageId,
    ) -> StoreResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT guild_id, channel_id, id, language, origin_channel_id, origin_id FROM messages
             WHERE guild_id = ?1 AND origin_channel_id = ?2 AND origin_id = ?3
             ORDER BY channel_id",
        )?;
        let rows = stmt.query_map(
            (
                guild_id.to_string(),
                origin_channel_id.to_string(),
                origin_id.to_string(),
            ),
            message_from_row,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        if messages.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(messages)
    }

    pub fn message_with_origin_by_lang(
        &self,
        guild_id: GuildId,
        origin_channel_id: ChannelId,
        origin_id: MessageId,
        language: Language,
    ) -> StoreResult<Message> {
        let conn = self.conn();
        conn.query_row(
            "SELECT guild_id, channel_id, id, language, origin_channel_id, origin_id FROM messages
             WHERE guild_id = ?1 AND origin_channel_id = ?2 AND origin_id = ?3 AND language = ?4",
            (
                guild_id.to_string(),
                origin_channel_id.to_string(),
                origin_id.to_string(),
                language.code(),
            ),
            message_from_row,
        )
        .map_err(not_found)
    }

    /// Requires the message's channel to be stored.
    pub fn insert_message(&self, message: &Message) -> StoreResult<()> {
        let conn = self.conn();
        let channel_exists = conn
            .prepare("SELECT 1 FROM channels WHERE guild_id = ?1 AND id = ?2")?
            .exists((message.guild_id.to_string(), message.channel_id.to_string()))?;
        if !channel_exists {
            return Err(StoreError::PreconditionFailed(format!(
                "channel {} doesn't exist in the database",
                message.channel_id
            )));
        }

        let rows = conn.execute(
            "INSERT OR IGNORE INTO messages (guild_id, channel_id, id, language, origin_channel_id, origin_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.guild_id.to_string(),
                message.channel_id.to_string(),
                message.id.to_string(),
                message.language.code(),
                message.origin_channel_id.map(|id| id.to_string()),
                message.origin_id.map(|id| id.to_string()),
            ],
        )?;
        affected(rows)
    }

    /// Deletes a single message row. Derived rows are not touched; callers remove
    /// them first.
    pub fn delete_message(&self, message: &Message) -> StoreResult<()> {
        let conn = self.conn();
        let rows = conn.execute(
            "DELETE FROM messages WHERE guild_id = ?1 AND channel_id = ?2 AND id = ?3",
            (
                message.guild_id.to_string(),
                message.channel_id.to_string(),
                message.id.to_string(),
            ),
        )?;
        affected(rows)
    }

    pub fn count_messages_in_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> StoreResult<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE guild_id = ?1 AND channel_id = ?2",
            (guild_id.to_string(), channel_id.to_string()),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn affected(rows: usize) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::NoAffect)
    } else {
        Ok(())
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        e => StoreError::Internal(e),
    }
}

fn check_groupable(conn: &Connection, guild_id: GuildId, channel: &Channel) -> StoreResult<()> {
    let stored = conn
        .prepare("SELECT 1 FROM channels WHERE guild_id = ?1 AND id = ?2")?
        .exists((guild_id.to_string(), channel.id.to_string()))?;
    if !stored {
        return Err(StoreError::PreconditionFailed(format!(
            "channel {} doesn't exist in the database",
            channel.id
        )));
    }

    let grouped = conn
        .prepare("SELECT 1 FROM channel_group_members WHERE guild_id = ?1 AND channel_id = ?2")?
        .exists((guild_id.to_string(), channel.id.to_string()))?;
    if grouped {
        return Err(StoreError::NoAffect);
    }
    Ok(())
}

fn select_group(conn: &Connection, guild_id: GuildId, group_id: i64) -> StoreResult<ChannelGroup> {
    let mut stmt = conn.prepare(
        "SELECT c.guild_id, c.id, c.language FROM channel_group_members m
         JOIN channels c ON c.guild_id = m.guild_id AND c.id = m.channel_id
         WHERE m.group_id = ?1 AND m.guild_id = ?2
         ORDER BY c.id",
    )?;
    let rows = stmt.query_map((group_id, guild_id.to_string()), channel_from_row)?;

    let mut channels = Vec::new();
    for row in rows {
        channels.push(row?);
    }

    if channels.is_empty() {
        return Err(StoreError::NotFound);
    }
    Ok(ChannelGroup {
        id: group_id,
        guild_id,
        channels,
    })
}

/// Drops a channel's membership, dissolving the group if it falls below two
/// members. Returns the group the channel was in.
fn detach_member(conn: &Connection, guild_id: GuildId, channel_id: ChannelId) -> StoreResult<Option<i64>> {
    let group_id: Option<i64> = conn
        .query_row(
            "SELECT group_id FROM channel_group_members WHERE guild_id = ?1 AND channel_id = ?2",
            (guild_id.to_string(), channel_id.to_string()),
            |row| row.get(0),
        )
        .optional()?;
    let Some(group_id) = group_id else {
        return Ok(None);
    };

    conn.execute(
        "DELETE FROM channel_group_members WHERE guild_id = ?1 AND channel_id = ?2",
        (guild_id.to_string(), channel_id.to_string()),
    )?;

    let remaining: i64 = conn.query_row(
        "SELECT COUNT(*) FROM channel_group_members WHERE group_id = ?1",
        [group_id],
        |row| row.get(0),
    )?;
    if remaining < 2 {
        delete_group(conn, group_id)?;
    }
    Ok(Some(group_id))
}

fn delete_group(conn: &Connection, group_id: i64) -> StoreResult<usize> {
    conn.execute(
        "DELETE FROM channel_group_members WHERE group_id = ?1",
        [group_id],
    )?;
    Ok(conn.execute("DELETE FROM channel_groups WHERE id = ?1", [group_id])?)
}

fn snowflake(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let raw: String = row.get(idx)?;
    parse_snowflake(&raw, idx)
}

fn optional_snowflake(row: &Row, idx: usize) -> rusqlite::Result<Option<u64>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_snowflake(&raw, idx)).transpose()
}

fn parse_snowflake(raw: &str, idx: usize) -> rusqlite::Result<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                format!("invalid snowflake '{}'", raw).into(),
            )
        })
}

fn language(row: &Row, idx: usize) -> rusqlite::Result<Language> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn channel_from_row(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        guild_id: GuildId::new(snowflake(row, 0)?),
        id: ChannelId::new(snowflake(row, 1)?),
        language: language(row, 2)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        guild_id: GuildId::new(snowflake(row, 0)?),
        channel_id: ChannelId::new(snowflake(row, 1)?),
        id: MessageId::new(snowflake(row, 2)?),
        language: language(row, 3)?,
        origin_channel_id: optional_snowflake(row, 4)?.map(ChannelId::new),
        origin_id: optional_snowflake(row, 5)?.map(MessageId::new),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild_id() -> GuildId {
        GuildId::new(1)
    }

    fn test_db() -> Database {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        db.insert_guild(&Guild::new(guild_id())).unwrap();
        db
    }

    fn channel(db: &Database, id: u64, language: Language) -> Channel {
        let channel = Channel::new(guild_id(), ChannelId::new(id), language);
        db.insert_channel(&channel).unwrap();
        channel
    }

    #[test]
    fn test_guild_insert_is_idempotent() {
        let db = test_db();
        let err = db.insert_guild(&Guild::new(guild_id())).unwrap_err();
        assert!(err.is_no_affect());

        let mut guild = db.guild(guild_id()).unwrap();
        guild.config.logging_level = Some(LogLevel::Warn);
        guild.config.logging_channel = Some(ChannelId::new(99));
        db.update_guild(&guild).unwrap();
        assert_eq!(db.guild(guild_id()).unwrap(), guild);

        assert!(db.guild(GuildId::new(2)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_channel_requires_guild() {
        let db = test_db();
        let orphan = Channel::new(GuildId::new(7), ChannelId::new(10), Language::En);
        assert!(matches!(
            db.insert_channel(&orphan),
            Err(StoreError::PreconditionFailed(_))
        ));

        let ch = channel(&db, 10, Language::En);
        assert!(db.insert_channel(&ch).unwrap_err().is_no_affect());

        let updated = Channel::new(guild_id(), ch.id, Language::Pt);
        db.update_channel(&updated).unwrap();
        assert_eq!(db.channel(guild_id(), ch.id).unwrap().language, Language::Pt);
    }

    #[test]
    fn test_group_membership_is_exclusive() {
        let db = test_db();
        let a = channel(&db, 10, Language::En);
        let b = channel(&db, 20, Language::Pt);
        let c = channel(&db, 30, Language::Es);

        let group = db.insert_channel_group(guild_id(), &[a.clone(), b.clone()]).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(db.channel_group(guild_id(), b.id).unwrap().id, group.id);

        // `a` is already grouped, so nothing is written.
        assert!(db
            .insert_channel_group(guild_id(), &[a.clone(), c.clone()])
            .unwrap_err()
            .is_no_affect());
        assert!(db.channel_group(guild_id(), c.id).unwrap_err().is_not_found());

        let group = db.add_group_member(group.id, &c).unwrap();
        assert_eq!(group.len(), 3);
        assert!(group.contains(c.id));
    }

    #[test]
    fn test_group_dissolves_below_two_members() {
        let db = test_db();
        let a = channel(&db, 10, Language::En);
        let b = channel(&db, 20, Language::Pt);
        let c = channel(&db, 30, Language::Es);
        db.insert_channel_group(guild_id(), &[a.clone(), b.clone(), c.clone()]).unwrap();

        let remaining = db.remove_group_member(guild_id(), c.id).unwrap().unwrap();
        assert_eq!(remaining.len(), 2);

        assert!(db.remove_group_member(guild_id(), b.id).unwrap().is_none());
        assert!(db.channel_group(guild_id(), a.id).unwrap_err().is_not_found());
        assert!(db.remove_group_member(guild_id(), a.id).unwrap_err().is_no_affect());
    }

    #[test]
    fn test_message_rows() {
        let db = test_db();
        let a = channel(&db, 10, Language::En);
        let b = channel(&db, 20, Language::Pt);

        let origin = Message::origin(guild_id(), a.id, MessageId::new(100), Language::En);
        db.insert_message(&origin).unwrap();
        assert!(db.insert_message(&origin).unwrap_err().is_no_affect());

        let derived = Message::derived(guild_id(), b.id, MessageId::new(200), Language::Pt, &origin);
        db.insert_message(&derived).unwrap();

        // A second Portuguese copy of the same origin is refused.
        let duplicate = Message::derived(guild_id(), b.id, MessageId::new(201), Language::Pt, &origin);
        assert!(db.insert_message(&duplicate).unwrap_err().is_no_affect());

        let siblings = db.messages_with_origin(guild_id(), a.id, origin.id).unwrap();
        assert_eq!(siblings, vec![derived.clone()]);
        assert_eq!(
            db.message_with_origin_by_lang(guild_id(), a.id, origin.id, Language::Pt).unwrap(),
            derived
        );

        db.delete_message(&derived).unwrap();
        assert!(db.messages_with_origin(guild_id(), a.id, origin.id).unwrap_err().is_not_found());
        assert!(db.delete_message(&derived).unwrap_err().is_no_affect());
    }

    #[test]
    fn test_message_requires_channel() {
        let db = test_db();
        let msg = Message::origin(guild_id(), ChannelId::new(77), MessageId::new(1), Language::En);
        assert!(matches!(
            db.insert_message(&msg),
            Err(StoreError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let db = test_db();
        let guild = db.run_blocking(|db| db.guild(guild_id())).await.unwrap();
        assert_eq!(guild.id, guild_id());
    }
}
