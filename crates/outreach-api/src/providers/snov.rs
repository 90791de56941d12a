//! Snov.io email finder client.
//!
//! Uses the OAuth client-credentials grant; the access token is cached until
//! shortly before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{base_url, required_env, EmailFinder, EmailMatch, ProviderError, ProviderResult};

const PROVIDER: &str = "snov";
const DEFAULT_BASE_URL: &str = "https://api.snov.io";

/// Refresh the access token this long before it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SnovConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl SnovConfig {
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            client_id: required_env("SNOV_CLIENT_ID")?,
            client_secret: required_env("SNOV_CLIENT_SECRET")?,
            base_url: base_url(
                &std::env::var("SNOV_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            )?,
            request_timeout: Duration::from_secs(20),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FindRequest<'a> {
    first_name: &'a str,
    last_name: &'a str,
    domain: &'a str,
}

#[derive(Deserialize)]
struct FindResponse {
    #[serde(default)]
    success: bool,
    data: Option<FindData>,
}

#[derive(Deserialize)]
struct FindData {
    #[serde(default)]
    emails: Vec<FoundEmail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FoundEmail {
    email: String,
    email_status: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct SnovClient {
    config: SnovConfig,
    http: Client,
    token: RwLock<Option<CachedToken>>,
}

impl SnovClient {
    pub fn new(config: SnovConfig) -> ProviderResult<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(SnovConfig::from_env()?)
    }

    async fn access_token(&self) -> ProviderResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut cached = self.token.write().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting Snov access token");
        let response = self
            .http
            .post(format!("{}/v1/oauth/access_token", self.config.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(PROVIDER, response).await);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid(PROVIDER, format!("token: {}", e)))?;

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn request_emails(
        &self,
        token: &str,
        request: &FindRequest<'_>,
    ) -> ProviderResult<reqwest::Response> {
        Ok(self
            .http
            .post(format!("{}/v1/get-emails-from-names", self.config.base_url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await?)
    }
}

#[async_trait]
impl EmailFinder for SnovClient {
    async fn find(&self, first_name: &str, last_name: &str, domain: &str) -> ProviderResult<EmailMatch> {
        let request = FindRequest {
            first_name,
            last_name,
            domain,
        };

        let token = self.access_token().await?;
        let mut response = self.request_emails(&token, &request).await?;

        // Token revoked early; fetch a new one once
        if response.status() == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            let token = self.access_token().await?;
            response = self.request_emails(&token, &request).await?;
        }

        if !response.status().is_success() {
            return Err(ProviderError::from_response(PROVIDER, response).await);
        }

        let body: FindResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid(PROVIDER, format!("emails: {}", e)))?;

        let not_found = || {
            ProviderError::NotFound(format!("no email for {} {} at {}", first_name, last_name, domain))
        };
        if !body.success {
            return Err(not_found());
        }

        body.data
            .and_then(|d| d.emails.into_iter().next())
            .map(|e| EmailMatch {
                email: e.email,
                status: e.email_status,
            })
            .ok_or_else(not_found)
    }
}
