//! Bright Data dataset API client for LinkedIn profile scraping.
//!
//! A scrape is a snapshot: `trigger` starts it, `progress` reports its
//! status and `snapshot` downloads the records once it is ready.

use std::time::Duration;

use async_trait::async_trait;
use outreach_models::{ScrapePoll, ScrapeStatus};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{base_url, required_env, ProviderError, ProviderResult, ScrapeProvider};

const PROVIDER: &str = "brightdata";
const DEFAULT_BASE_URL: &str = "https://api.brightdata.com";

#[derive(Debug, Clone)]
pub struct BrightDataConfig {
    pub api_key: String,
    /// Dataset that scrapes LinkedIn profiles by URL.
    pub dataset_id: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl BrightDataConfig {
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            api_key: required_env("BRIGHTDATA_API_KEY")?,
            dataset_id: required_env("BRIGHTDATA_DATASET_ID")?,
            base_url: base_url(
                &std::env::var("BRIGHTDATA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            )?,
            request_timeout: Duration::from_secs(30),
        })
    }
}

#[derive(Serialize)]
struct TriggerInput<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct TriggerResponse {
    snapshot_id: String,
}

#[derive(Deserialize)]
struct ProgressResponse {
    status: String,
}

pub struct BrightDataClient {
    config: BrightDataConfig,
    http: Client,
}

impl BrightDataClient {
    pub fn new(config: BrightDataConfig) -> ProviderResult<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(BrightDataConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/datasets/v3/{}", self.config.base_url, path)
    }
}

#[async_trait]
impl ScrapeProvider for BrightDataClient {
    async fn submit(&self, target_url: &str) -> ProviderResult<String> {
        let response = self
            .http
            .post(self.url("trigger"))
            .bearer_auth(&self.config.api_key)
            .query(&[
                ("dataset_id", self.config.dataset_id.as_str()),
                ("include_errors", "true"),
            ])
            .json(&[TriggerInput { url: target_url }])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(PROVIDER, response).await);
        }

        let body: TriggerResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid(PROVIDER, format!("trigger: {}", e)))?;

        debug!(snapshot_id = %body.snapshot_id, "Triggered profile scrape");
        Ok(body.snapshot_id)
    }

    async fn poll(&self, job_id: &str) -> ProviderResult<ScrapePoll> {
        let response = self
            .http
            .get(self.url(&format!("progress/{}", job_id)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(PROVIDER, response).await);
        }

        let progress: ProgressResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid(PROVIDER, format!("progress: {}", e)))?;

        let status = ScrapeStatus::from_provider(&progress.status);
        let result = match status {
            ScrapeStatus::Ready => Some(self.fetch(job_id).await?),
            _ => None,
        };

        Ok(ScrapePoll { status, result })
    }

    async fn fetch(&self, job_id: &str) -> ProviderResult<serde_json::Value> {
        let response = self
            .http
            .get(self.url(&format!("snapshot/{}", job_id)))
            .bearer_auth(&self.config.api_key)
            .query(&[("format", "json")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(PROVIDER, response).await);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid(PROVIDER, format!("snapshot: {}", e)))?;

        // One input URL yields one record
        match body {
            serde_json::Value::Array(mut records) if !records.is_empty() => {
                let record = records.swap_remove(0);
                if record.get("error").is_some() {
                    return Err(ProviderError::JobFailed {
                        job_id: job_id.to_string(),
                        status: record["error"].to_string(),
                    });
                }
                Ok(record)
            }
            serde_json::Value::Array(_) => {
                Err(ProviderError::NotFound(format!("snapshot {} is empty", job_id)))
            }
            serde_json::Value::Object(_) => Ok(body),
            _ => Err(ProviderError::invalid(PROVIDER, "snapshot is not JSON records")),
        }
    }
}
