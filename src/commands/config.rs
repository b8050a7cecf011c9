use crate::db::LogLevel;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Configure relay logging for this server
#[poise::command(
    slash_command,
    subcommands("log_channel", "log_level"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn config(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Post relay logs to a channel (leave empty to stop)
#[poise::command(slash_command, rename = "log-channel")]
pub async fn log_channel(
    ctx: Context<'_>,
    #[description = "Channel that receives relay logs"]
    #[channel_types("Text")]
    channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let registry = &ctx.data().registry;

    let mut guild = registry.guild(guild_id).await?;
    guild.config.logging_channel = channel.as_ref().map(|c| c.id);
    registry.update_guild(guild).await?;

    let reply = match channel {
        Some(channel) => format!("✅ Relay logs will be posted in <#{}>.", channel.id),
        None => "✅ Relay logs will no longer be posted.".to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Set the minimum level of logs posted to the log channel
#[poise::command(slash_command, rename = "log-level")]
pub async fn log_level(
    ctx: Context<'_>,
    #[description = "Minimum level"] level: LogLevel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let registry = &ctx.data().registry;

    let mut guild = registry.guild(guild_id).await?;
    guild.config.logging_level = Some(level);
    let has_channel = guild.config.logging_channel.is_some();
    registry.update_guild(guild).await?;

    let mut reply = format!("✅ Log level set to **{:?}**.", level);
    if !has_channel {
        reply.push_str(" Use `/config log-channel` to choose where logs go.");
    }
    ctx.say(reply).await?;
    Ok(())
}
