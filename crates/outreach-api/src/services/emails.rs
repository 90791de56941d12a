//! Work email lookup.
//!
//! A lookup that finds nothing is a provider failure: the user is not charged.

use std::sync::Arc;

use outreach_models::{parse_web_url, OperationKind};
use serde::{Deserialize, Serialize};

use crate::providers::{EmailFinder, EmailMatch};
use crate::services::operation::{
    OperationError, OperationOutcome, OperationRequest, PaidOperationRunner,
};

#[derive(Debug, Clone, Deserialize)]
pub struct EmailRequest {
    pub first_name: String,
    pub last_name: String,
    /// Company domain or website URL.
    pub domain: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FoundEmail {
    pub first_name: String,
    pub last_name: String,
    pub domain: String,
    #[serde(flatten)]
    pub found: EmailMatch,
}

#[derive(Clone)]
pub struct EmailService {
    runner: PaidOperationRunner,
    finder: Arc<dyn EmailFinder>,
}

impl EmailService {
    pub fn new(runner: PaidOperationRunner, finder: Arc<dyn EmailFinder>) -> Self {
        Self { runner, finder }
    }

    pub async fn find(
        &self,
        user_id: &str,
        request: &EmailRequest,
    ) -> Result<OperationOutcome<FoundEmail>, OperationError> {
        let first_name = request.first_name.trim().to_string();
        let last_name = request.last_name.trim().to_string();
        let domain = normalize_domain(&request.domain).ok_or_else(|| {
            OperationError::InvalidRequest(format!("invalid domain: {}", request.domain))
        })?;
        if first_name.is_empty() || last_name.is_empty() {
            return Err(OperationError::InvalidRequest(
                "first_name and last_name are required".into(),
            ));
        }

        let key = format!(
            "email:{}|{}|{}",
            first_name.to_lowercase(),
            last_name.to_lowercase(),
            domain
        );
        let config = self.runner.config();
        let paid = OperationRequest::new(user_id, OperationKind::EmailLookup, config.email_price, key)
            .with_description(format!("Email lookup: {} {} at {}", first_name, last_name, domain))
            .with_entry("domain", domain.clone());

        let finder = Arc::clone(&self.finder);
        self.runner
            .run(paid, config.email_timeout, move || async move {
                let found = finder.find(&first_name, &last_name, &domain).await?;
                Ok(FoundEmail {
                    first_name,
                    last_name,
                    domain,
                    found,
                })
            })
            .await
    }
}

/// `https://www.Acme.com:8443/about` -> `acme.com`.
fn normalize_domain(raw: &str) -> Option<String> {
    let parsed = parse_web_url(raw)?;
    // IP literals have no domain
    let host = parsed.domain()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let valid = host.contains('.') && !host.starts_with('.') && !host.ends_with('.');
    valid.then(|| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("acme.com").as_deref(), Some("acme.com"));
        assert_eq!(
            normalize_domain(" https://www.Acme.com/about?x=1 ").as_deref(),
            Some("acme.com")
        );
        assert_eq!(normalize_domain("localhost"), None);
        assert_eq!(normalize_domain("acme .com"), None);
        assert_eq!(normalize_domain(""), None);
    }

    #[test]
    fn test_normalize_domain_ignores_port_and_rejects_ip() {
        assert_eq!(
            normalize_domain("https://acme.com:8443/team").as_deref(),
            Some("acme.com")
        );
        assert_eq!(normalize_domain("WWW.ACME.COM:443").as_deref(), Some("acme.com"));
        assert_eq!(normalize_domain("http://10.0.0.1/"), None);
        assert_eq!(normalize_domain("ftp://acme.com"), None);
    }
}
