//! Sign-in bootstrap.

use axum::extract::State;
use axum::Json;
use outreach_models::Account;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Create the caller's account with the signup grant on first sign-in.
///
/// Idempotent: later calls return the existing account unchanged.
pub async fn create_session(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Account>> {
    let account = state.credits.ensure_account(&user.uid, user.email).await?;
    Ok(Json(account))
}
