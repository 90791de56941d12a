//! Outreach message generation.

use std::sync::Arc;

use outreach_models::{canonical_profile_url, OperationKind};
use serde::{Deserialize, Serialize};

use crate::providers::TextGenerator;
use crate::services::operation::{
    OperationError, OperationOutcome, OperationRequest, PaidOperationRunner,
};

/// Longest free-text field accepted in a request.
const MAX_FIELD_CHARS: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    /// Profile the message is for; used to detect duplicate submissions.
    pub profile_url: String,
    /// Extracted profile data.
    #[serde(default)]
    pub profile: serde_json::Value,
    /// What the sender wants (intro, referral, sales...).
    #[serde(default)]
    pub purpose: Option<String>,
    /// A line or two about the sender.
    #[serde(default)]
    pub sender_context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedMessage {
    pub profile_url: String,
    pub message: String,
}

#[derive(Clone)]
pub struct MessageService {
    runner: PaidOperationRunner,
    generator: Arc<dyn TextGenerator>,
}

impl MessageService {
    pub fn new(runner: PaidOperationRunner, generator: Arc<dyn TextGenerator>) -> Self {
        Self { runner, generator }
    }

    pub async fn generate(
        &self,
        user_id: &str,
        request: &MessageRequest,
    ) -> Result<OperationOutcome<GeneratedMessage>, OperationError> {
        let profile_url = canonical_profile_url(&request.profile_url).ok_or_else(|| {
            OperationError::InvalidRequest(format!(
                "not a LinkedIn profile URL: {}",
                request.profile_url
            ))
        })?;
        for field in [&request.purpose, &request.sender_context].into_iter().flatten() {
            if field.chars().count() > MAX_FIELD_CHARS {
                return Err(OperationError::InvalidRequest(format!(
                    "text fields are limited to {} characters",
                    MAX_FIELD_CHARS
                )));
            }
        }

        let config = self.runner.config();
        let paid = OperationRequest::new(
            user_id,
            OperationKind::Message,
            config.message_price,
            format!("message:{}", profile_url),
        )
        .with_description(format!("Message generation: {}", profile_url))
        .with_entry("profile_url", profile_url.clone());

        let prompt = build_prompt(request);
        let generator = Arc::clone(&self.generator);
        self.runner
            .run(paid, config.message_timeout, move || async move {
                let message = generator.generate(&prompt).await?;
                Ok(GeneratedMessage {
                    profile_url,
                    message,
                })
            })
            .await
    }
}

fn build_prompt(request: &MessageRequest) -> String {
    let mut prompt = String::from(
        "Write a short, friendly LinkedIn connection message (under 300 characters) \
         to the person described below. Reply with the message text only.\n",
    );
    if let Some(purpose) = &request.purpose {
        prompt.push_str(&format!("\nPurpose: {}\n", purpose.trim()));
    }
    if let Some(sender) = &request.sender_context {
        prompt.push_str(&format!("\nAbout the sender: {}\n", sender.trim()));
    }
    prompt.push_str("\nProfile:\n");
    prompt.push_str(&request.profile.to_string());
    prompt
}
