//! In-process ledger and hold registry.
//!
//! The ledger keeps each account behind its own `tokio::sync::Mutex`; holding
//! that lock is the row lock, so concurrent writes to one account serialize
//! while different accounts proceed in parallel. Used for tests and
//! single-node development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_models::{
    Account, AllowanceGrant, CreditContext, CreditTransaction, Credits, Hold,
};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::holds::{HoldInsert, HoldStore, HoldStoreResult};
use crate::ledger::{
    allowance_balance, check_deduction, LedgerEntry, LedgerError, LedgerResult, LedgerStore,
    ResetResult,
};

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug)]
struct AccountRow {
    account: Account,
    /// Oldest first.
    transactions: Vec<CreditTransaction>,
}

/// In-memory ledger.
#[derive(Default)]
pub struct MemoryLedger {
    rows: RwLock<HashMap<String, Arc<Mutex<AccountRow>>>>,
    failing_writes: AtomicU32,
    lost_acks: AtomicU32,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` mutating calls fail with `Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` deductions or allowances commit and then report
    /// `Unavailable`, as if the response had been lost.
    pub fn lose_next_acks(&self, count: u32) {
        self.lost_acks.store(count, Ordering::SeqCst);
    }

    /// Starting balance plus the signed sum of the log.
    pub async fn replayed_balance(&self, user_id: &str) -> LedgerResult<Credits> {
        let row = self.row(user_id).await?;
        let row = row.lock().await;
        Ok(row.account.opening_balance
            + row.transactions.iter().map(|t| t.credits_change).sum::<Credits>())
    }

    async fn row(&self, user_id: &str) -> LedgerResult<Arc<Mutex<AccountRow>>> {
        self.rows
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
    }

    fn take_injected_failure(&self) -> LedgerResult<()> {
        if take_one(&self.failing_writes) {
            Err(LedgerError::Unavailable("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn acknowledge(&self, entry: LedgerEntry) -> LedgerResult<LedgerEntry> {
        if take_one(&self.lost_acks) {
            Err(LedgerError::Unavailable("write acknowledgement lost".to_string()))
        } else {
            Ok(entry)
        }
    }

    /// Entry for a transaction id that is already in the log.
    fn applied(row: &AccountRow, tx_id: &str) -> Option<LedgerEntry> {
        row.transactions
            .iter()
            .find(|t| t.id == tx_id)
            .map(|t| LedgerEntry {
                new_balance: t.balance_after,
                transaction: t.clone(),
            })
    }

    fn append(row: &mut AccountRow, tx: CreditTransaction) -> LedgerEntry {
        row.account.credits_remaining = tx.balance_after;
        row.account.updated_at = tx.created_at;
        row.transactions.push(tx.clone());
        LedgerEntry {
            new_balance: tx.balance_after,
            transaction: tx,
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_account(&self, account: Account) -> LedgerResult<Account> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows.get(&account.user_id) {
            return Ok(existing.lock().await.account.clone());
        }
        rows.insert(
            account.user_id.clone(),
            Arc::new(Mutex::new(AccountRow {
                account: account.clone(),
                transactions: Vec::new(),
            })),
        );
        debug!(user_id = %account.user_id, "Created account");
        Ok(account)
    }

    async fn get_account(&self, user_id: &str) -> LedgerResult<Account> {
        let row = self.row(user_id).await?;
        let account = row.lock().await.account.clone();
        Ok(account)
    }

    async fn apply_deduction(
        &self,
        user_id: &str,
        amount: Credits,
        context: &CreditContext,
    ) -> LedgerResult<LedgerEntry> {
        let row = self.row(user_id).await?;
        let mut row = row.lock().await;
        self.take_injected_failure()?;

        if let Some(entry) = Self::applied(&row, &context.transaction_id) {
            debug!(user_id = %user_id, tx_id = %context.transaction_id, "Deduction already applied");
            return Ok(entry);
        }

        let balance = row.account.credits_remaining;
        check_deduction(balance, amount)?;

        let tx = CreditTransaction::deduction(user_id, amount, balance, context);
        self.acknowledge(Self::append(&mut row, tx))
    }

    async fn apply_reset(&self, user_id: &str, floor: Credits) -> LedgerResult<ResetResult> {
        let row = self.row(user_id).await?;
        let mut row = row.lock().await;
        self.take_injected_failure()?;

        let balance = row.account.credits_remaining;
        if balance >= floor {
            return Ok(ResetResult::AlreadyAtFloor { balance });
        }

        let tx = CreditTransaction::reset(user_id, balance, floor);
        Ok(ResetResult::Applied(Self::append(&mut row, tx)))
    }

    async fn apply_allowance(
        &self,
        user_id: &str,
        grant: &AllowanceGrant,
    ) -> LedgerResult<LedgerEntry> {
        let row = self.row(user_id).await?;
        let mut row = row.lock().await;
        self.take_injected_failure()?;

        if let Some(entry) = Self::applied(&row, &grant.transaction_id) {
            debug!(user_id = %user_id, tx_id = %grant.transaction_id, "Allowance already applied");
            return Ok(entry);
        }

        let balance = row.account.credits_remaining;
        let new_balance = allowance_balance(balance, grant)?;

        if grant.updates_plan() {
            row.account.package_type = grant.package_type;
            row.account.billing_model = grant.billing_model;
            row.account.plan_code = Some(grant.plan_code.clone());
        }

        let tx = CreditTransaction::allowance(user_id, grant, balance, new_balance);
        self.acknowledge(Self::append(&mut row, tx))
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> LedgerResult<Vec<CreditTransaction>> {
        let row = self.row(user_id).await?;
        let row = row.lock().await;
        Ok(row.transactions.iter().rev().take(limit).cloned().collect())
    }

    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// =============================================================================
// Hold registry
// =============================================================================

/// Process-local hold registry. Holds are lost on restart.
#[derive(Default)]
pub struct MemoryHoldStore {
    holds: Mutex<HashMap<String, Hold>>,
}

impl MemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HoldStore for MemoryHoldStore {
    async fn get(&self, user_id: &str) -> HoldStoreResult<Option<Hold>> {
        Ok(self.holds.lock().await.get(user_id).cloned())
    }

    async fn insert(&self, hold: Hold) -> HoldStoreResult<HoldInsert> {
        let mut holds = self.holds.lock().await;
        if let Some(existing) = holds.get(&hold.user_id) {
            return Ok(HoldInsert::Occupied(existing.clone()));
        }
        holds.insert(hold.user_id.clone(), hold);
        Ok(HoldInsert::Inserted)
    }

    async fn remove(&self, user_id: &str) -> HoldStoreResult<Option<Hold>> {
        Ok(self.holds.lock().await.remove(user_id))
    }

    async fn remove_if(&self, user_id: &str, hold_id: &str) -> HoldStoreResult<Option<Hold>> {
        let mut holds = self.holds.lock().await;
        match holds.get(user_id) {
            Some(h) if h.hold_id == hold_id => Ok(holds.remove(user_id)),
            _ => Ok(None),
        }
    }

    async fn remove_expired(&self, cutoff: DateTime<Utc>) -> HoldStoreResult<Vec<Hold>> {
        let mut holds = self.holds.lock().await;
        let expired: Vec<String> = holds
            .values()
            .filter(|h| h.created_at < cutoff)
            .map(|h| h.user_id.clone())
            .collect();
        Ok(expired
            .iter()
            .filter_map(|user_id| holds.remove(user_id))
            .collect())
    }

    async fn count(&self) -> HoldStoreResult<usize> {
        Ok(self.holds.lock().await.len())
    }
}
