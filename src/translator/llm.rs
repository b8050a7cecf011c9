use super::{TranslateError, TranslateResult, Translator};
use crate::config::Config;
use crate::lang::Language;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Translates through any OpenAI-compatible chat completion endpoint.
pub struct LlmTranslator {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl LlmTranslator {
    pub fn new(config: &Config) -> Self {
        let api_key = config.translator_api_key.as_deref().unwrap_or("unused");
        let openai = OpenAIConfig::new()
            .with_api_base(&config.translator_url)
            .with_api_key(api_key);

        Self {
            client: Client::with_config(openai),
            model: config.translator_model.clone(),
            timeout: config.translator_timeout,
        }
    }

    async fn complete(&self, system: String, user: &str) -> TranslateResult<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(request_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(request_error)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.0)
            .build()
            .map_err(request_error)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| TranslateError::Timeout(self.timeout))?
            .map_err(request_error)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(TranslateError::EmptyResponse)
    }
}

fn request_error(e: impl std::fmt::Display) -> TranslateError {
    TranslateError::Request(e.to_string())
}

fn translate_prompt(from: Language, to: Language) -> String {
    format!(
        "You translate chat messages from {} to {}. Reply with the translation only. \
         Keep mentions, emoji, links, code and markdown formatting unchanged.",
        from.english_name(),
        to.english_name()
    )
}

fn detect_prompt() -> String {
    let codes: Vec<&str> = Language::ALL.iter().map(|l| l.code()).collect();
    format!(
        "Identify the language of the user's message. Reply with exactly one of these \
         ISO 639-1 codes and nothing else: {}.",
        codes.join(", ")
    )
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(&self, from: Language, to: Language, text: &str) -> TranslateResult<String> {
        if from == to || text.trim().is_empty() {
            return Ok(text.to_string());
        }
        debug!(%from, %to, chars = text.len(), "Translating with LLM");
        self.complete(translate_prompt(from, to), text).await
    }

    async fn detect(&self, text: &str) -> TranslateResult<Language> {
        let answer = self.complete(detect_prompt(), text).await?;
        answer
            .trim_matches(|c: char| !c.is_alphanumeric())
            .parse()
            .map_err(|_| TranslateError::Undetected)
    }
}
