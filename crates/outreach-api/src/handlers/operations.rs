//! Paid operation handlers.
//!
//! Each handler runs one hold/call/commit cycle. A success response carries
//! the amount charged; any error response means nothing was charged.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::{
    EmailRequest, ExtractedProfile, FoundEmail, GeneratedMessage, MessageRequest,
    OperationOutcome,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExtractProfileRequest {
    pub profile_url: String,
}

/// Scrape a LinkedIn profile.
pub async fn extract_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ExtractProfileRequest>,
) -> ApiResult<Json<OperationOutcome<ExtractedProfile>>> {
    let outcome = state
        .profiles
        .extract(&user.uid, &request.profile_url)
        .await?;
    Ok(Json(outcome))
}

/// Generate an outreach message for a profile.
pub async fn generate_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<MessageRequest>,
) -> ApiResult<Json<OperationOutcome<GeneratedMessage>>> {
    let outcome = state.messages.generate(&user.uid, &request).await?;
    Ok(Json(outcome))
}

/// Look up a work email address.
pub async fn find_email(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<EmailRequest>,
) -> ApiResult<Json<OperationOutcome<FoundEmail>>> {
    let outcome = state.emails.find(&user.uid, &request).await?;
    Ok(Json(outcome))
}
