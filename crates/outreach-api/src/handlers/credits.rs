//! Credit balance, history and hold handlers.

use axum::extract::{Query, State};
use axum::Json;
use outreach_models::{CreditTransaction, Credits, OperationKind};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::{CreditBalance, CreditCheck};
use crate::state::AppState;

/// Query parameters for the credit history endpoint.
#[derive(Debug, Deserialize)]
pub struct CreditHistoryQuery {
    /// Clamped to 1..=100; defaults to 20.
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct CreditHistoryResponse {
    pub transactions: Vec<CreditTransaction>,
}

/// Preflight request: an explicit amount, or an operation priced from config.
#[derive(Debug, Deserialize)]
pub struct CreditCheckRequest {
    pub amount: Option<Credits>,
    pub operation: Option<OperationKind>,
}

#[derive(Serialize)]
pub struct CreditCheckResponse {
    #[serde(flatten)]
    pub check: CreditCheck,
    pub required: Credits,
}

#[derive(Serialize)]
pub struct ReleaseHoldResponse {
    pub released: bool,
}

/// Get the caller's balance.
pub async fn get_credits(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<CreditBalance>> {
    let balance = state.credits.get_credit_balance(&user.uid).await?;
    Ok(Json(balance))
}

/// Get the caller's recent transactions, newest first.
pub async fn get_credit_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CreditHistoryQuery>,
) -> ApiResult<Json<CreditHistoryResponse>> {
    let transactions = state
        .credits
        .get_credit_history(&user.uid, query.limit)
        .await?;
    Ok(Json(CreditHistoryResponse { transactions }))
}

/// Check whether the caller can afford an amount or an operation.
pub async fn check_credits(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreditCheckRequest>,
) -> ApiResult<Json<CreditCheckResponse>> {
    let required = match (request.amount, request.operation) {
        (Some(amount), _) => amount,
        (None, Some(operation)) => state.operations.price_of(operation),
        (None, None) => return Err(ApiError::bad_request("amount or operation is required")),
    };
    if !required.is_positive() {
        return Err(ApiError::bad_request("amount must be positive"));
    }

    let check = state.credits.check_credits(&user.uid, required).await?;
    Ok(Json(CreditCheckResponse { check, required }))
}

/// Drop the caller's outstanding hold, if any.
pub async fn release_hold(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<ReleaseHoldResponse>> {
    let released = state.credits.release_credit_hold(&user.uid).await?;
    Ok(Json(ReleaseHoldResponse { released }))
}
