//! Profile extraction: one paid scrape of a LinkedIn profile.

use std::sync::Arc;
use std::time::Duration;

use outreach_models::{canonical_profile_url, OperationKind, ScrapeStatus};
use serde::Serialize;
use tracing::debug;

use crate::providers::{ProviderError, ProviderResult, ScrapeProvider};
use crate::services::operation::{
    OperationError, OperationOutcome, OperationRequest, PaidOperationRunner,
};

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedProfile {
    pub profile_url: String,
    pub job_id: String,
    /// Provider record, passed through as-is.
    pub profile: serde_json::Value,
}

#[derive(Clone)]
pub struct ProfileService {
    runner: PaidOperationRunner,
    scraper: Arc<dyn ScrapeProvider>,
}

impl ProfileService {
    pub fn new(runner: PaidOperationRunner, scraper: Arc<dyn ScrapeProvider>) -> Self {
        Self { runner, scraper }
    }

    /// Scrape `raw_url` and charge the scrape price once the record is in hand.
    pub async fn extract(
        &self,
        user_id: &str,
        raw_url: &str,
    ) -> Result<OperationOutcome<ExtractedProfile>, OperationError> {
        let profile_url = canonical_profile_url(raw_url).ok_or_else(|| {
            OperationError::InvalidRequest(format!("not a LinkedIn profile URL: {}", raw_url))
        })?;

        let config = self.runner.config();
        let request = OperationRequest::new(
            user_id,
            OperationKind::Scrape,
            config.scrape_price,
            profile_url.clone(),
        )
        .with_description(format!("Profile extraction: {}", profile_url))
        .with_entry("profile_url", profile_url.clone());

        let scraper = Arc::clone(&self.scraper);
        let poll_interval = config.scrape_poll_interval;
        self.runner
            .run(request, config.scrape_timeout, move || async move {
                scrape_to_completion(scraper.as_ref(), &profile_url, poll_interval).await
            })
            .await
    }
}

/// Submit a job and poll until it reaches a terminal state.
///
/// Unbounded by itself; the runner's timeout cuts it off.
pub async fn scrape_to_completion(
    scraper: &dyn ScrapeProvider,
    profile_url: &str,
    poll_interval: Duration,
) -> ProviderResult<ExtractedProfile> {
    let job_id = scraper.submit(profile_url).await?;

    loop {
        let poll = scraper.poll(&job_id).await?;
        debug!(job_id = %job_id, status = %poll.status, "Polled scrape job");

        match poll.status {
            ScrapeStatus::Ready => {
                let profile = match poll.result {
                    Some(profile) => profile,
                    None => scraper.fetch(&job_id).await?,
                };
                return Ok(ExtractedProfile {
                    profile_url: profile_url.to_string(),
                    job_id,
                    profile,
                });
            }
            ScrapeStatus::Failed => {
                return Err(ProviderError::JobFailed {
                    job_id,
                    status: poll.status.to_string(),
                });
            }
            ScrapeStatus::Pending | ScrapeStatus::Running => {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
