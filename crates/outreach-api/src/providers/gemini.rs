//! Gemini client for outreach message generation.
//!
//! Models are tried in order; the first successful answer wins.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{base_url, required_env, ProviderError, ProviderResult, TextGenerator};

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-2.5-flash-lite"];

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Tried in order until one answers.
    pub models: Vec<String>,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let models: Vec<String> = std::env::var("GEMINI_MODELS")
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            api_key: required_env("GEMINI_API_KEY")?,
            base_url: base_url(
                &std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            )?,
            models: if models.is_empty() {
                DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
            } else {
                models
            },
            request_timeout: Duration::from_secs(45),
        })
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

pub struct GeminiClient {
    config: GeminiConfig,
    http: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> ProviderResult<Self> {
        if config.models.is_empty() {
            return Err(ProviderError::NotConfigured("no Gemini models configured".into()));
        }
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    async fn call_model(&self, model: &str, prompt: &str) -> ProviderResult<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, model, self.config.api_key
        );

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                max_output_tokens: 1024,
            },
        };

        let response = self.http.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(PROVIDER, response).await);
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid(PROVIDER, e.to_string()))?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::invalid(PROVIDER, "empty candidate"));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> ProviderResult<String> {
        let mut last_error = None;

        for model in &self.config.models {
            match self.call_model(model, prompt).await {
                Ok(text) => {
                    info!(model = %model, "Generated message");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "Gemini model failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::NotConfigured("no Gemini models configured".into())))
    }
}
