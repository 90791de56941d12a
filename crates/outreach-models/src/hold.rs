//! Credit hold (reservation) models.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::credits::Credits;
use crate::transaction::OperationKind;

/// Default hold lifetime before the sweep force-releases it.
pub const DEFAULT_HOLD_TTL_SECS: u64 = 3600;

/// Longest hold lifetime accepted from configuration (one week).
pub const MAX_HOLD_TTL_SECS: u64 = 7 * 24 * 3600;

/// Default interval between hold sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 1800;

/// A temporary reservation against an account's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Hold {
    pub hold_id: String,
    pub user_id: String,
    pub amount: Credits,
    pub operation: OperationKind,
    pub created_at: DateTime<Utc>,
}

impl Hold {
    pub fn new(user_id: impl Into<String>, amount: Credits, operation: OperationKind) -> Self {
        Self {
            hold_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            amount,
            operation,
            created_at: Utc::now(),
        }
    }

    /// True once the hold is older than `ttl` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }

    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.created_at + ttl
    }
}

/// Result of a successful hold creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HoldReceipt {
    pub hold_id: String,
    pub amount: Credits,
    /// Balance left once the held amount is charged.
    pub projected_remaining: Credits,
}
