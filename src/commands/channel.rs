use crate::db::ChannelGroup;
use crate::lang::Language;
use crate::registry::RegistryError;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Manage translation for this channel
#[poise::command(
    slash_command,
    subcommands("language", "link", "unlink", "info", "detect"),
    required_permissions = "MANAGE_CHANNELS",
    guild_only
)]
pub async fn channel(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn members(group: &ChannelGroup) -> String {
    group
        .channels
        .iter()
        .map(|c| format!("<#{}> ({})", c.id, c.language.code()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Registry refusals are answered in the channel; store failures bubble up.
fn refusal(e: RegistryError) -> Result<String, Error> {
    match e {
        RegistryError::Store(e) => Err(e.into()),
        e => Ok(format!("❌ {}", e)),
    }
}

/// Set the language messages in this channel are written in
#[poise::command(slash_command)]
pub async fn language(
    ctx: Context<'_>,
    #[description = "Language of this channel"] language: Language,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    let reply = match ctx
        .data()
        .registry
        .set_language(guild_id, ctx.channel_id(), language)
        .await
    {
        Ok(channel) => format!(
            "✅ <#{}> is now a **{}** channel.",
            channel.id,
            channel.language.english_name()
        ),
        Err(e) => refusal(e)?,
    };

    ctx.say(reply).await?;
    Ok(())
}

/// Relay messages between this channel and another one
#[poise::command(slash_command)]
pub async fn link(
    ctx: Context<'_>,
    #[description = "Channel to keep in sync with this one"]
    #[channel_types("Text", "News", "PublicThread", "PrivateThread")]
    other: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let data = ctx.data();

    ctx.defer().await?;

    let here = data.platform.channel(ctx.channel_id()).await?;
    let there = data.platform.channel(other.id).await?;

    let reply = match data
        .registry
        .link(guild_id, (here.id, here.kind), (there.id, there.kind))
        .await
    {
        Ok(group) => format!("🔗 Linked. Messages are now relayed between {}.", members(&group)),
        Err(e) => refusal(e)?,
    };

    ctx.say(reply).await?;
    Ok(())
}

/// Stop relaying messages to and from this channel
#[poise::command(slash_command)]
pub async fn unlink(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    let reply = match ctx.data().registry.unlink(guild_id, ctx.channel_id()).await {
        Ok(Some(group)) => format!("✂️ Unlinked. The rest of the group keeps relaying: {}.", members(&group)),
        Ok(None) => "✂️ Unlinked. The group had no other pair left and was dissolved.".to_string(),
        Err(e) => refusal(e)?,
    };

    ctx.say(reply).await?;
    Ok(())
}

/// Show this channel's language and linked channels
#[poise::command(slash_command)]
pub async fn info(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let registry = &ctx.data().registry;

    let channel = registry.resolve(guild_id, ctx.channel_id()).await?;
    let group = registry.group(guild_id, ctx.channel_id()).await?;
    let tracked = registry.count_messages(guild_id, ctx.channel_id()).await?;

    let linked = group
        .as_ref()
        .map(members)
        .unwrap_or_else(|| "Not linked".to_string());

    let embed = serenity::CreateEmbed::new()
        .title("🌐 Channel Translation")
        .description(format!("Settings for <#{}>", channel.id))
        .field(
            "Language",
            format!("{} (`{}`)", channel.language.english_name(), channel.language.code()),
            true,
        )
        .field("Tracked messages", format!("`{}`", tracked), true)
        .field("Linked channels", linked, false)
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Guess which language a piece of text is written in
#[poise::command(slash_command)]
pub async fn detect(
    ctx: Context<'_>,
    #[description = "Text to inspect"] text: String,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;

    let language = ctx.data().translator.detect(&text).await?;
    ctx.say(format!(
        "🔎 Looks like **{}** (`{}`).",
        language.english_name(),
        language.code()
    ))
    .await?;
    Ok(())
}
