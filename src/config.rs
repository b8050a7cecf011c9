use crate::lang::Language;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Which translation backend the relay talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorKind {
    Mock,
    Llm,
    Libre,
}

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub default_language: Language,
    pub translator: TranslatorKind,
    pub translator_url: String,
    pub translator_model: String,
    pub translator_api_key: Option<String>,
    pub translator_timeout: Duration,
    pub thread_replay_limit: u8,
    pub endpoint_cache_capacity: usize,
    pub endpoint_prefix: String,
    pub register_commands: bool,
    pub dev_guild_id: Option<u64>,
}

const DEFAULT_LLM_URL: &str = "http://localhost:8080/v1";
const DEFAULT_LIBRE_URL: &str = "http://localhost:5000";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let translator = match env::var("TRANSLATOR")
            .unwrap_or_else(|_| "mock".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "mock" | "none" => TranslatorKind::Mock,
            "llm" | "openai" => TranslatorKind::Llm,
            "libre" | "libretranslate" => TranslatorKind::Libre,
            other => anyhow::bail!("TRANSLATOR must be one of mock, llm, libre (got '{}')", other),
        };

        let default_url = match translator {
            TranslatorKind::Libre => DEFAULT_LIBRE_URL,
            _ => DEFAULT_LLM_URL,
        };

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/polycord.db".to_string()),
            default_language: env::var("DEFAULT_LANGUAGE")
                .ok()
                .and_then(|code| code.parse().ok())
                .unwrap_or_default(),
            translator,
            translator_url: env::var("TRANSLATOR_URL").unwrap_or_else(|_| default_url.to_string()),
            translator_model: env::var("TRANSLATOR_MODEL")
                .unwrap_or_else(|_| "local-model".to_string()),
            translator_api_key: env::var("TRANSLATOR_API_KEY").ok(),
            translator_timeout: env::var("TRANSLATOR_TIMEOUT")
                .ok()
                .and_then(|raw| humantime::parse_duration(raw.trim()).ok())
                .unwrap_or(Duration::from_secs(30)),
            thread_replay_limit: env::var("THREAD_REPLAY_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u8>()
                .ok()
                .filter(|limit| (1..=100).contains(limit))
                .unwrap_or(10),
            endpoint_cache_capacity: env::var("ENDPOINT_CACHE_CAPACITY")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .unwrap_or(512),
            endpoint_prefix: env::var("ENDPOINT_PREFIX")
                .unwrap_or_else(|_| "polycord-user-".to_string()),
            register_commands: env::var("REGISTER_COMMANDS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            dev_guild_id: env::var("DEV_GUILD_ID").ok().and_then(|id| id.parse().ok()),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("database_url", &self.database_url)
            .field("default_language", &self.default_language)
            .field("translator", &self.translator)
            .field("translator_url", &self.translator_url)
            .field("translator_model", &self.translator_model)
            .field(
                "translator_api_key",
                &self.translator_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("translator_timeout", &self.translator_timeout)
            .field("thread_replay_limit", &self.thread_replay_limit)
            .field("endpoint_cache_capacity", &self.endpoint_cache_capacity)
            .field("endpoint_prefix", &self.endpoint_prefix)
            .field("register_commands", &self.register_commands)
            .field("dev_guild_id", &self.dev_guild_id)
            .finish()
    }
}

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// Thread names are capped at 100 characters
pub const THREAD_NAME_LIMIT: usize = 100;
