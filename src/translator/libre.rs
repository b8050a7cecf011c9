use super::{TranslateError, TranslateResult, Translator};
use crate::config::Config;
use crate::lang::Language;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Client for a LibreTranslate server.
pub struct LibreTranslator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    q: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct Detection {
    language: String,
    #[serde(default)]
    confidence: f32,
}

impl LibreTranslator {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.translator_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.translator_url.trim_end_matches('/').to_string(),
            api_key: config.translator_api_key.clone(),
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> TranslateResult<R> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?
            .json::<R>()
            .await
            .map_err(request_error)
    }
}

fn request_error(e: reqwest::Error) -> TranslateError {
    if e.is_timeout() {
        TranslateError::Request(format!("timed out: {}", e))
    } else {
        TranslateError::Request(e.to_string())
    }
}

/// Picks the most confident detection that maps to a supported language.
fn best_detection(mut detections: Vec<Detection>) -> TranslateResult<Language> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
        .iter()
        .find_map(|d| d.language.parse().ok())
        .ok_or(TranslateError::Undetected)
}

#[async_trait]
impl Translator for LibreTranslator {
    async fn translate(&self, from: Language, to: Language, text: &str) -> TranslateResult<String> {
        if from == to || text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let request = TranslateRequest {
            q: text,
            source: from.code(),
            target: to.code(),
            format: "text",
            api_key: self.api_key.as_deref(),
        };
        let response: TranslateResponse = self.post("/translate", &request).await?;
        if response.translated_text.is_empty() {
            return Err(TranslateError::EmptyResponse);
        }
        Ok(response.translated_text)
    }

    async fn detect(&self, text: &str) -> TranslateResult<Language> {
        let request = DetectRequest {
            q: text,
            api_key: self.api_key.as_deref(),
        };
        let detections: Vec<Detection> = self.post("/detect", &request).await?;
        best_detection(detections)
    }
}
