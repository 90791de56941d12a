//! Hold manager: one outstanding reservation per user.
//!
//! A hold reserves part of a balance while a paid action is in flight. The
//! slot per user moves `Empty -> Held -> Empty`, leaving `Held` through exactly
//! one of commit (deduct, then release), release, or expiry.
//!
//! Only one hold per user is supported: a second paid action is refused while
//! the first is outstanding. The post-deduct release in `CreditService`
//! relies on this.
//!
//! With the memory store the registry is process-local. Two instances behind a
//! load balancer do not see each other's holds; select the Firestore store to
//! share them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use outreach_models::{Credits, Hold, HoldReceipt, OperationKind, MAX_HOLD_TTL_SECS};
use outreach_store::{HoldInsert, HoldStore, LedgerStore};
use tracing::{info, warn};

use crate::error::CreditError;
use crate::metrics;

#[derive(Clone)]
pub struct HoldManager {
    holds: Arc<dyn HoldStore>,
    ledger: Arc<dyn LedgerStore>,
    ttl: Duration,
    /// `ttl` as a chrono offset, capped at `MAX_HOLD_TTL_SECS`.
    max_age: chrono::Duration,
}

impl HoldManager {
    pub fn new(holds: Arc<dyn HoldStore>, ledger: Arc<dyn LedgerStore>, ttl: Duration) -> Self {
        let ttl = ttl.min(Duration::from_secs(MAX_HOLD_TTL_SECS));
        let max_age = chrono::Duration::seconds(ttl.as_secs() as i64);
        Self {
            holds,
            ledger,
            ttl,
            max_age,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Reserve `amount` for `operation`.
    ///
    /// Fails with `InsufficientCredits` when the balance minus any outstanding
    /// hold cannot cover `amount`, and with `HoldConflict` when it could but a
    /// hold is already outstanding.
    pub async fn create(
        &self,
        user_id: &str,
        amount: Credits,
        operation: OperationKind,
    ) -> Result<HoldReceipt, CreditError> {
        if !amount.is_positive() {
            return Err(CreditError::InvalidAmount(amount));
        }

        let balance = self.ledger.get_balance(user_id).await?;

        if let Some(existing) = self.holds.get(user_id).await? {
            return Err(occupied(balance, &existing, amount));
        }

        if amount > balance {
            metrics::record_hold_rejected("insufficient");
            return Err(CreditError::InsufficientCredits {
                available: balance,
                held: Credits::ZERO,
                required: amount,
            });
        }

        let hold = Hold::new(user_id, amount, operation);
        let hold_id = hold.hold_id.clone();

        match self.holds.insert(hold).await? {
            HoldInsert::Inserted => {
                metrics::record_hold_created(operation);
                info!(
                    user_id = %user_id,
                    hold_id = %hold_id,
                    amount = %amount,
                    operation = %operation,
                    "Created credit hold"
                );
                Ok(HoldReceipt {
                    hold_id,
                    amount,
                    projected_remaining: balance - amount,
                })
            }
            // Lost the race to a concurrent create
            HoldInsert::Occupied(existing) => Err(occupied(balance, &existing, amount)),
        }
    }

    /// Drop the user's hold, whichever it is. True if one existed.
    pub async fn release(&self, user_id: &str) -> Result<bool, CreditError> {
        match self.holds.remove(user_id).await? {
            Some(hold) => {
                metrics::record_hold_released("release");
                info!(
                    user_id = %user_id,
                    hold_id = %hold.hold_id,
                    amount = %hold.amount,
                    "Released credit hold"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop the user's hold only if it is still `hold_id`.
    pub async fn release_hold(&self, user_id: &str, hold_id: &str) -> Result<bool, CreditError> {
        let released = self.holds.remove_if(user_id, hold_id).await?.is_some();
        if released {
            metrics::record_hold_released("abandoned");
            info!(user_id = %user_id, hold_id = %hold_id, "Released abandoned credit hold");
        }
        Ok(released)
    }

    pub async fn current(&self, user_id: &str) -> Result<Option<Hold>, CreditError> {
        Ok(self.holds.get(user_id).await?)
    }

    /// Amount currently reserved for the user.
    pub async fn held_amount(&self, user_id: &str) -> Result<Credits, CreditError> {
        Ok(self
            .holds
            .get(user_id)
            .await?
            .map(|h| h.amount)
            .unwrap_or(Credits::ZERO))
    }

    /// Release every hold older than the TTL at `now`. Nothing is charged.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Hold>, CreditError> {
        let expired = self.holds.remove_expired(now - self.max_age).await?;

        for hold in &expired {
            warn!(
                user_id = %hold.user_id,
                hold_id = %hold.hold_id,
                amount = %hold.amount,
                operation = %hold.operation,
                created_at = %hold.created_at,
                "Swept expired credit hold"
            );
        }
        if !expired.is_empty() {
            metrics::record_holds_swept(expired.len());
        }

        Ok(expired)
    }

    pub async fn outstanding(&self) -> Result<usize, CreditError> {
        Ok(self.holds.count().await?)
    }
}

fn occupied(balance: Credits, existing: &Hold, required: Credits) -> CreditError {
    let available = balance.saturating_sub_floor(existing.amount);
    if available < required {
        metrics::record_hold_rejected("insufficient");
        CreditError::InsufficientCredits {
            available,
            held: existing.amount,
            required,
        }
    } else {
        metrics::record_hold_rejected("conflict");
        CreditError::HoldConflict {
            hold_id: existing.hold_id.clone(),
            held: existing.amount,
        }
    }
}
