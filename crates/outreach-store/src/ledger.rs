//! Ledger store abstraction.
//!
//! A ledger holds one account row per user plus an append-only transaction
//! log. Every mutation writes the new balance and appends exactly one
//! transaction in the same atomic unit, so the balance always equals the
//! opening balance plus the signed sum of the log.

use async_trait::async_trait;
use outreach_models::{Account, AllowanceGrant, CreditContext, CreditTransaction, Credits};
use thiserror::Error;

use crate::error::FirestoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Credits, required: Credits },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Credits),

    /// Concurrent writers kept winning the optimistic-lock race.
    #[error("Write conflict on account {user_id} after {attempts} attempts")]
    WriteConflict { user_id: String, attempts: u32 },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt ledger record: {0}")]
    Corrupt(String),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),
}

impl LedgerError {
    /// True when the write was aborted and may succeed after a delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::WriteConflict { .. } | LedgerError::Unavailable(_) => true,
            LedgerError::Firestore(e) => e.is_retryable() || e.is_precondition_failed(),
            _ => false,
        }
    }
}

/// Outcome of a balance-changing write.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub new_balance: Credits,
    pub transaction: CreditTransaction,
}

/// Outcome of a floor reset.
#[derive(Debug, Clone, PartialEq)]
pub enum ResetResult {
    /// Balance was raised to the floor.
    Applied(LedgerEntry),
    /// Balance already at or above the floor; nothing written.
    AlreadyAtFloor { balance: Credits },
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the account unless one exists; returns the stored row either way.
    async fn create_account(&self, account: Account) -> LedgerResult<Account>;

    async fn get_account(&self, user_id: &str) -> LedgerResult<Account>;

    async fn get_balance(&self, user_id: &str) -> LedgerResult<Credits> {
        Ok(self.get_account(user_id).await?.credits_remaining)
    }

    /// Charge `amount`. Fails with `InsufficientFunds` against the balance
    /// read inside the atomic unit. A context whose transaction id is
    /// already in the log returns that entry and charges nothing.
    async fn apply_deduction(
        &self,
        user_id: &str,
        amount: Credits,
        context: &CreditContext,
    ) -> LedgerResult<LedgerEntry>;

    /// Raise the balance to `floor` if it is below it.
    async fn apply_reset(&self, user_id: &str, floor: Credits) -> LedgerResult<ResetResult>;

    /// Apply a billing allowance. Only subscription grants move the account
    /// onto the grant's plan. Repeats of a stored transaction id return the
    /// stored entry.
    async fn apply_allowance(
        &self,
        user_id: &str,
        grant: &AllowanceGrant,
    ) -> LedgerResult<LedgerEntry>;

    /// Most recent transactions first.
    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> LedgerResult<Vec<CreditTransaction>>;

    /// Readiness probe.
    async fn ping(&self) -> LedgerResult<()>;
}

/// Validate a deduction against a balance read inside the atomic unit.
pub(crate) fn check_deduction(balance: Credits, amount: Credits) -> LedgerResult<Credits> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount));
    }
    if amount > balance {
        return Err(LedgerError::InsufficientFunds {
            balance,
            required: amount,
        });
    }
    Ok(balance - amount)
}

/// Balance after applying `grant` to `balance`.
pub(crate) fn allowance_balance(balance: Credits, grant: &AllowanceGrant) -> LedgerResult<Credits> {
    if grant.amount.is_negative() {
        return Err(LedgerError::InvalidAmount(grant.amount));
    }
    grant
        .mode
        .apply(balance, grant.amount)
        .ok_or(LedgerError::InvalidAmount(grant.amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_deduction() {
        assert_eq!(
            check_deduction(Credits::whole(10), Credits::whole(2)).unwrap(),
            Credits::whole(8)
        );
        assert_eq!(
            check_deduction(Credits::whole(2), Credits::whole(2)).unwrap(),
            Credits::ZERO
        );
        assert!(matches!(
            check_deduction(Credits::whole(1), Credits::whole(2)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            check_deduction(Credits::whole(1), Credits::ZERO),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_retryable_classification() {
        let conflict = LedgerError::WriteConflict {
            user_id: "u1".into(),
            attempts: 5,
        };
        assert!(conflict.is_retryable());
        assert!(!LedgerError::AccountNotFound("u1".into()).is_retryable());
        assert!(LedgerError::Firestore(FirestoreError::from_http_status(503, "x")).is_retryable());
    }
}
