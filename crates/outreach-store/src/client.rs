//! Firestore REST API client.
//!
//! Production-grade client with:
//! - Token caching with refresh margin
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)
//! - Emulator support via `FIRESTORE_EMULATOR_HOST`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::{TokenCache, TokenSource};
use crate::types::{
    CommitRequest, CommitResponse, Document, RunQueryRequest, RunQueryResponse, StructuredQuery,
    Value, Write,
};

// =============================================================================
// Configuration
// =============================================================================

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
    /// `host:port` of a Firestore emulator; plain HTTP, no credentials
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let timeout_secs: u64 = std::env::var("FIRESTORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
        })
    }

    /// Resource prefix used in document names.
    pub fn database_path(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }

    fn documents_url(&self) -> String {
        match &self.emulator_host {
            Some(host) => format!("http://{}/v1/{}", host, self.database_path()),
            None => format!("https://firestore.googleapis.com/v1/{}", self.database_path()),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl FirestoreClient {
    /// Create a new Firestore client.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let token_cache = if config.emulator_host.is_some() {
            TokenCache::emulator()
        } else {
            TokenCache::new(TokenSource::Provider(Self::create_auth_provider()?))
        };
        Self::with_token_cache(config, token_cache)
    }

    /// Create a client with an explicit token cache.
    pub fn with_token_cache(
        config: FirestoreConfig,
        token_cache: TokenCache,
    ) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("outreach-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        Ok(Self {
            http,
            base_url: config.documents_url(),
            config,
            token_cache: Arc::new(token_cache),
        })
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        let config = FirestoreConfig::from_env()?;
        Self::new(config).await
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    /// Full resource name for a document path such as `accounts/u1`.
    pub fn full_document_name(&self, path: &str) -> String {
        format!("{}/{}", self.config.database_path(), path)
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    // =========================================================================
    // Document Operations
    // =========================================================================

    /// Get a document. `collection` may be a nested path like `accounts/u1/credit_transactions`.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = format!("{}/{}/{}", self.base_url, collection, doc_id);

        self.execute_request("get_document", collection, Some(doc_id), async {
            let response = self.send_authorized(|token| self.http.get(&url).bearer_auth(token)).await?;

            match response.status() {
                StatusCode::OK => Ok(Some(response.json::<Document>().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` if the id is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);

        self.execute_request("create_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&body))
                .await?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json::<Document>().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Delete a document. Deleting a missing document succeeds.
    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<()> {
        let url = format!("{}/{}/{}", self.base_url, collection, doc_id);

        self.execute_request("delete_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(|token| self.http.delete(&url).bearer_auth(token))
                .await?;

            match response.status() {
                StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
                StatusCode::NOT_FOUND => {
                    debug!("Document {}/{} already deleted", collection, doc_id);
                    Ok(())
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Apply writes atomically: either every write lands or none does.
    ///
    /// A violated precondition surfaces as `PreconditionFailed` (stale
    /// `updateTime`) or `AlreadyExists` (create-only write).
    pub async fn commit(&self, writes: Vec<Write>) -> FirestoreResult<CommitResponse> {
        if writes.is_empty() {
            return Ok(CommitResponse::default());
        }
        if writes.len() > 500 {
            return Err(FirestoreError::request_failed("Commit exceeds 500 write limit"));
        }

        let url = format!("{}:commit", self.base_url);
        let request = CommitRequest { writes };

        self.execute_request("commit", "commit", None, async {
            let response = self
                .send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&request))
                .await?;

            match response.status() {
                StatusCode::OK => Ok(response.json::<CommitResponse>().await?),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Execute with retry.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = FirestoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    // =========================================================================
    // Query Operations
    // =========================================================================

    /// Run a structured query.
    ///
    /// `parent_path` is the document containing the queried collection, e.g.
    /// `accounts/USER_ID` for `accounts/USER_ID/credit_transactions`. An empty
    /// path queries top-level collections.
    pub async fn run_query(
        &self,
        parent_path: &str,
        query: StructuredQuery,
    ) -> FirestoreResult<Vec<Document>> {
        let url = if parent_path.is_empty() {
            format!("{}:runQuery", self.base_url)
        } else {
            format!("{}/{}:runQuery", self.base_url, parent_path)
        };
        let request = RunQueryRequest {
            structured_query: query,
        };

        self.execute_request("run_query", parent_path, None, async {
            let response = self
                .send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&request))
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let body = response.text().await.unwrap_or_default();
                    // runQuery returns a JSON array of RunQueryResponse objects
                    let responses: Vec<RunQueryResponse> =
                        serde_json::from_str(&body).map_err(|e| {
                            FirestoreError::invalid_response(format!(
                                "Failed to parse runQuery response: {} (body prefix: {})",
                                e,
                                body.chars().take(200).collect::<String>()
                            ))
                        })?;

                    Ok(responses.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Send a request with a bearer token, refreshing once on an expired token.
    async fn send_authorized<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.token_cache.get_token().await?;
        let response = build(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(401, body));
        }

        self.token_cache.invalidate().await;
        let token = self.token_cache.get_token().await?;
        Ok(build(&token).send().await?)
    }

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = if let Some(id) = doc_id {
            info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %id)
        } else {
            info_span!("firestore_request", operation = %operation, collection = %collection)
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: Response,
    ) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}
