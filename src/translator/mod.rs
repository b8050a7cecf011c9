pub mod libre;
pub mod llm;

pub use libre::LibreTranslator;
pub use llm::LlmTranslator;

use crate::config::{Config, TranslatorKind};
use crate::lang::Language;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Request(String),

    #[error("translation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("translator returned no usable output")]
    EmptyResponse,

    #[error("could not detect the language of the text")]
    Undetected,
}

pub type TranslateResult<T> = Result<T, TranslateError>;

/// Text translation capability.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, from: Language, to: Language, text: &str) -> TranslateResult<String>;

    async fn detect(&self, text: &str) -> TranslateResult<Language>;
}

/// Returns text unchanged and detects everything as the default language.
#[derive(Debug, Default, Clone)]
pub struct MockTranslator {
    pub language: Language,
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, _from: Language, _to: Language, text: &str) -> TranslateResult<String> {
        Ok(text.to_string())
    }

    async fn detect(&self, _text: &str) -> TranslateResult<Language> {
        Ok(self.language)
    }
}

/// Builds the translator selected in the configuration.
pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn Translator>> {
    Ok(match config.translator {
        TranslatorKind::Mock => Arc::new(MockTranslator {
            language: config.default_language,
        }),
        TranslatorKind::Llm => Arc::new(LlmTranslator::new(config)),
        TranslatorKind::Libre => Arc::new(LibreTranslator::new(config)?),
    })
}
