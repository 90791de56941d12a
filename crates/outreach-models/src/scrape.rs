//! Asynchronous scrape job status as reported by the scraping provider.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Pending,
    Running,
    Ready,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::Running => "running",
            ScrapeStatus::Ready => "ready",
            ScrapeStatus::Failed => "failed",
        }
    }

    /// Provider-specific status names collapse onto the four states.
    pub fn from_provider(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ready" | "done" | "completed" | "success" => ScrapeStatus::Ready,
            "running" | "building" | "collecting" | "in_progress" => ScrapeStatus::Running,
            "failed" | "error" | "canceled" | "cancelled" => ScrapeStatus::Failed,
            _ => ScrapeStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScrapeStatus::Ready | ScrapeStatus::Failed)
    }
}

impl std::fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One poll of a scrape job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScrapePoll {
    pub status: ScrapeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ScrapePoll {
    pub fn pending() -> Self {
        Self {
            status: ScrapeStatus::Pending,
            result: None,
        }
    }
}

/// Canonical form of a LinkedIn profile URL, used as the dedupe key.
///
/// Only the `/in/<slug>` segment survives: scheme, port, query, fragment and
/// any sub-page (`/details/experience`) are dropped, and the slug is
/// lowercased, so every link to the same profile collapses to one key.
pub fn canonical_profile_url(raw: &str) -> Option<String> {
    let parsed = parse_web_url(raw)?;

    let host = parsed.host_str()?.to_lowercase();
    if host != "linkedin.com" && !host.ends_with(".linkedin.com") {
        return None;
    }

    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    if segments.next()? != "in" {
        return None;
    }
    let slug = segments.next()?.to_lowercase();

    Some(format!("https://www.linkedin.com/in/{}", slug))
}

/// Parse a user-supplied web address, accepting a bare `host/path` form.
pub fn parse_web_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let parsed = if trimmed.contains("://") {
        Url::parse(trimmed).ok()?
    } else {
        Url::parse(&format!("https://{}", trimmed)).ok()?
    };

    match parsed.scheme() {
        "http" | "https" => Some(parsed),
        _ => None,
    }
}
