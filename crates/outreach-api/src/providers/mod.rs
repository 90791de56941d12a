//! External paid-action providers.
//!
//! Each provider sits behind a trait so the operation services can be driven
//! by fakes in tests:
//! - `ScrapeProvider`: asynchronous scrape jobs (Bright Data dataset API)
//! - `TextGenerator`: LLM text generation (Gemini)
//! - `EmailFinder`: work email lookup (Snov.io)

pub mod brightdata;
pub mod gemini;
pub mod snov;

use async_trait::async_trait;
use outreach_models::ScrapePoll;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use brightdata::{BrightDataClient, BrightDataConfig};
pub use gemini::{GeminiClient, GeminiConfig};
pub use snov::{SnovClient, SnovConfig};

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    /// The job reached a terminal state other than ready.
    #[error("Job {job_id} ended as {status}")]
    JobFailed { job_id: String, status: String },

    #[error("No result: {0}")]
    NotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub(crate) fn invalid(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: message.into(),
        }
    }

    /// Build a `Status` error from a non-success response.
    pub(crate) async fn from_response(provider: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::Status {
            provider,
            status,
            body: body.chars().take(200).collect(),
        }
    }
}

/// Read a required environment variable.
pub(crate) fn required_env(key: &str) -> ProviderResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::NotConfigured(format!("{} is not set", key)))
}

/// Validate and normalize a base URL (no trailing slash).
pub(crate) fn base_url(value: &str) -> ProviderResult<String> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ProviderError::NotConfigured(format!("invalid base URL {}: {}", value, e)))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Asynchronous scrape job system.
#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    /// Start a job for `target_url`; returns the provider's job id.
    async fn submit(&self, target_url: &str) -> ProviderResult<String>;

    /// Current status; `result` is set once the job is ready.
    async fn poll(&self, job_id: &str) -> ProviderResult<ScrapePoll>;

    /// Download the result of a ready job.
    async fn fetch(&self, job_id: &str) -> ProviderResult<serde_json::Value>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> ProviderResult<String>;
}

/// A work email found for a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMatch {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[async_trait]
pub trait EmailFinder: Send + Sync {
    /// Fails with `NotFound` when the provider has no address.
    async fn find(&self, first_name: &str, last_name: &str, domain: &str) -> ProviderResult<EmailMatch>;
}
