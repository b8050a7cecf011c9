pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS guilds (
        id TEXT PRIMARY KEY,
        config TEXT NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS channels (
        guild_id TEXT NOT NULL,
        id TEXT NOT NULL,
        language TEXT NOT NULL,
        PRIMARY KEY (guild_id, id),
        FOREIGN KEY (guild_id) REFERENCES guilds (id)
    );

    CREATE TABLE IF NOT EXISTS channel_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL,
        FOREIGN KEY (guild_id) REFERENCES guilds (id)
    );

    -- One row per member; the primary key keeps a channel in at most one group.
    CREATE TABLE IF NOT EXISTS channel_group_members (
        guild_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        group_id INTEGER NOT NULL,
        PRIMARY KEY (guild_id, channel_id),
        FOREIGN KEY (guild_id, channel_id) REFERENCES channels (guild_id, id),
        FOREIGN KEY (group_id) REFERENCES channel_groups (id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_group_members_group ON channel_group_members (group_id);

    CREATE TABLE IF NOT EXISTS messages (
        guild_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        id TEXT NOT NULL,
        language TEXT NOT NULL,
        origin_channel_id TEXT,
        origin_id TEXT,
        PRIMARY KEY (guild_id, channel_id, id),
        FOREIGN KEY (guild_id, channel_id) REFERENCES channels (guild_id, id)
    );
    CREATE INDEX IF NOT EXISTS idx_messages_origin
        ON messages (guild_id, origin_channel_id, origin_id);
    -- At most one derived copy per language for a given origin.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_origin_language
        ON messages (guild_id, origin_channel_id, origin_id, language)
        WHERE origin_id IS NOT NULL;
";
