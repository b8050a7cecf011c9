use polycord::config::Config;
use polycord::db::Database;
use polycord::dispatch::Dispatcher;
use polycord::events::EventTable;
use polycord::ledger::MessageLedger;
use polycord::platform::discord::{self, DiscordPlatform};
use polycord::platform::Platform;
use polycord::proxy::IdentityProxy;
use polycord::registry::ChannelRegistry;
use polycord::threads::ThreadMirror;
use polycord::{commands, translator, Data};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let db = Database::new(&config.database_url)
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
    db.execute_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize database: {}", e))?;

    let translator = translator::from_config(&config)?;
    info!(backend = ?config.translator, "Translator ready");

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            event_handler: |_ctx, event, _framework, data| {
                Box::pin(async move {
                    for event in discord::events_from(event) {
                        data.events.submit(event);
                    }
                    Ok(())
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    if let poise::FrameworkError::Command { error, ctx, .. } = &error {
                        error!(command = %ctx.command().qualified_name, error = %error, "Command failed");
                    }
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!("Error while handling error: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!(user = %ready.user.name, guilds = ready.guilds.len(), "Bot is ready!");

                if config.register_commands {
                    match config.dev_guild_id {
                        Some(guild_id) => {
                            let guild_id = serenity::GuildId::new(guild_id);
                            poise::builtins::register_in_guild(ctx, &framework.options().commands, guild_id).await?;
                            info!(guild = %guild_id, "Registered commands in development guild");
                        }
                        None => {
                            poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                            info!("Registered commands globally");
                        }
                    }
                }

                let platform: Arc<dyn Platform> = Arc::new(DiscordPlatform::new(ctx.http.clone()));
                let registry = ChannelRegistry::new(db.clone(), config.default_language);
                let proxy = Arc::new(IdentityProxy::new(
                    platform.clone(),
                    config.endpoint_cache_capacity,
                    config.endpoint_prefix.clone(),
                ));
                let dispatcher = Dispatcher::new(
                    registry.clone(),
                    MessageLedger::new(db),
                    proxy,
                    translator.clone(),
                    platform.clone(),
                );
                let mirror = ThreadMirror::new(dispatcher.clone(), config.thread_replay_limit);
                let events = EventTable::relay(registry.clone(), platform.clone(), dispatcher, mirror);

                Ok(Data {
                    config,
                    registry,
                    translator,
                    platform,
                    events: Arc::new(events),
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
