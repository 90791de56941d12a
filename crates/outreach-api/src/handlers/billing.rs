//! Billing webhook and internal allowance endpoints.
//!
//! Both are server-to-server and authenticate with an HMAC-SHA256
//! signature in `X-Webhook-Signature` instead of a user token. The signed
//! payload is the raw request body for the webhook and the user id for the
//! reset route. Signatures are URL-safe base64 without padding.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use outreach_models::{BillingEvent, Credits};
use serde::Serialize;
use sha2::Sha256;
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::services::ResetOutcome;
use crate::state::AppState;

pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize)]
pub struct BillingEventResponse {
    pub user_id: String,
    pub new_balance: Credits,
    pub transaction_id: String,
}

/// Apply a subscription change from the billing provider.
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<BillingEventResponse>> {
    verify_signature(&state, &headers, &body)?;

    let event: BillingEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid billing event: {}", e)))?;

    let entry = state.credits.apply_billing_event(&event).await?;
    Ok(Json(BillingEventResponse {
        user_id: event.user_id,
        new_balance: entry.new_balance,
        transaction_id: entry.transaction.id,
    }))
}

/// Top a free account back up to the floor. Called by the period scheduler.
pub async fn reset_free_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(uid): Path<String>,
) -> ApiResult<Json<ResetOutcome>> {
    verify_signature(&state, &headers, uid.as_bytes())?;

    let outcome = state.credits.reset_free_credits(&uid).await?;
    Ok(Json(outcome))
}

/// Sign `payload` the way callers of the server-to-server routes must.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, ApiError> {
    let mut mac = new_mac(secret)?;
    mac.update(payload);
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn verify_signature(state: &AppState, headers: &HeaderMap, payload: &[u8]) -> Result<(), ApiError> {
    let Some(secret) = state.config.webhook_secret.as_deref() else {
        warn!("Rejected server-to-server call: WEBHOOK_SECRET is not configured");
        return Err(ApiError::forbidden("Webhook secret is not configured"));
    };

    let provided = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing webhook signature"))?;

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(provided.trim())
        .map_err(|_| ApiError::unauthorized("Invalid webhook signature"))?;

    let mut mac = new_mac(secret)?;
    mac.update(payload);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| ApiError::unauthorized("Invalid webhook signature"))
}

fn new_mac(secret: &str) -> Result<HmacSha256, ApiError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::internal(format!("Invalid HMAC key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_stable_and_keyed() {
        let a = sign_payload("secret", b"{\"x\":1}").unwrap();
        assert_eq!(a, sign_payload("secret", b"{\"x\":1}").unwrap());
        assert_ne!(a, sign_payload("other", b"{\"x\":1}").unwrap());
        assert_ne!(a, sign_payload("secret", b"{\"x\":2}").unwrap());
        // 32-byte tag, unpadded
        assert_eq!(a.len(), 43);
        assert!(!a.contains('='));
    }
}
