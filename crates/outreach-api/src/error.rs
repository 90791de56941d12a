//! API and credit error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use outreach_models::Credits;
use outreach_store::{HoldStoreError, LedgerError};
use serde::Serialize;
use thiserror::Error;

use crate::services::operation::OperationError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures surfaced by the credit service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CreditError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient credits: {available} available, {held} held, {required} required")]
    InsufficientCredits {
        available: Credits,
        held: Credits,
        required: Credits,
    },

    /// The user already has an outstanding hold.
    #[error("A hold of {held} credits is already outstanding ({hold_id})")]
    HoldConflict { hold_id: String, held: Credits },

    /// The store aborted the write. Retry after a delay.
    #[error("Ledger write failed: {0}")]
    LedgerWriteFailed(String),

    #[error("Duplicate submission: {0}")]
    DuplicateSubmission(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Credits),

    #[error("Unknown plan code: {0}")]
    UnknownPlan(String),
}

impl CreditError {
    /// True for conditions that may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CreditError::HoldConflict { .. } | CreditError::LedgerWriteFailed(_)
        )
    }

    fn code(&self) -> &'static str {
        match self {
            CreditError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            CreditError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            CreditError::HoldConflict { .. } => "HOLD_CONFLICT",
            CreditError::LedgerWriteFailed(_) => "LEDGER_WRITE_FAILED",
            CreditError::DuplicateSubmission(_) => "DUPLICATE_SUBMISSION",
            CreditError::InvalidAmount(_) => "INVALID_AMOUNT",
            CreditError::UnknownPlan(_) => "UNKNOWN_PLAN",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CreditError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            CreditError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            CreditError::HoldConflict { .. } | CreditError::DuplicateSubmission(_) => {
                StatusCode::CONFLICT
            }
            CreditError::LedgerWriteFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            CreditError::InvalidAmount(_) | CreditError::UnknownPlan(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<LedgerError> for CreditError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AccountNotFound(uid) => CreditError::AccountNotFound(uid),
            LedgerError::InsufficientFunds { balance, required } => {
                CreditError::InsufficientCredits {
                    available: balance,
                    held: Credits::ZERO,
                    required,
                }
            }
            LedgerError::InvalidAmount(amount) => CreditError::InvalidAmount(amount),
            other => CreditError::LedgerWriteFailed(other.to_string()),
        }
    }
}

impl From<HoldStoreError> for CreditError {
    fn from(e: HoldStoreError) -> Self {
        CreditError::LedgerWriteFailed(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Credit(#[from] CreditError),

    /// The external provider failed. Nothing was charged.
    #[error("Provider failed: {0}")]
    Provider(String),

    #[error("Provider timed out: {0}")]
    ProviderTimeout(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Credit(e) => e.status_code(),
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::ProviderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::Credit(e) => Some(e.code()),
            ApiError::Provider(_) => Some("PROVIDER_FAILED"),
            ApiError::ProviderTimeout(_) => Some("PROVIDER_TIMEOUT"),
            _ => None,
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            ApiError::Internal(_) | ApiError::Credit(CreditError::LedgerWriteFailed(_))
        )
    }
}

impl From<OperationError> for ApiError {
    fn from(e: OperationError) -> Self {
        match e {
            OperationError::Credit(e) => ApiError::Credit(e),
            OperationError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            OperationError::Provider(e) => ApiError::Provider(e.to_string()),
            e @ OperationError::Timeout { .. } => ApiError::ProviderTimeout(e.to_string()),
        }
    }
}

/// Shortfall amounts attached to `INSUFFICIENT_CREDITS` responses.
#[derive(Serialize)]
struct Shortfall {
    available: Credits,
    held: Credits,
    required: Credits,
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credits: Option<Shortfall>,
    /// Set on provider failures so clients never imply a charge.
    #[serde(skip_serializing_if = "Option::is_none")]
    charged: Option<bool>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if self.is_internal()
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let credits = match &self {
            ApiError::Credit(CreditError::InsufficientCredits {
                available,
                held,
                required,
            }) => Some(Shortfall {
                available: *available,
                held: *held,
                required: *required,
            }),
            _ => None,
        };

        let charged = match &self {
            ApiError::Provider(_) | ApiError::ProviderTimeout(_) => Some(false),
            _ => None,
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
            credits,
            charged,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_map_to_credit_errors() {
        let e: CreditError = LedgerError::InsufficientFunds {
            balance: Credits::whole(1),
            required: Credits::whole(2),
        }
        .into();
        assert_eq!(
            e,
            CreditError::InsufficientCredits {
                available: Credits::whole(1),
                held: Credits::ZERO,
                required: Credits::whole(2),
            }
        );

        let e: CreditError = LedgerError::WriteConflict {
            user_id: "u1".into(),
            attempts: 5,
        }
        .into();
        assert!(matches!(e, CreditError::LedgerWriteFailed(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn test_status_codes() {
        let insufficient = ApiError::Credit(CreditError::InsufficientCredits {
            available: Credits::whole(1),
            held: Credits::ZERO,
            required: Credits::whole(2),
        });
        assert_eq!(insufficient.status_code(), StatusCode::PAYMENT_REQUIRED);

        let conflict = ApiError::Credit(CreditError::HoldConflict {
            hold_id: "h".into(),
            held: Credits::whole(1),
        });
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let write = ApiError::Credit(CreditError::LedgerWriteFailed("x".into()));
        assert_eq!(write.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(
            ApiError::Provider("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
