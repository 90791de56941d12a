//! Credit service: the entry point for every balance-affecting action.
//!
//! Composes the ledger and the hold manager into a two-phase protocol:
//!
//! 1. `check_credits` - read-only preflight
//! 2. `create_credit_hold` - reserve the price
//! 3. the caller performs the paid action
//! 4. `deduct_credits` on success (charges, then releases the user's hold)
//!    or `release_credit_hold` on failure (no charge)
//!
//! Errors are returned typed and never swallowed; the caller decides whether
//! to release.

use std::sync::Arc;

use outreach_models::{
    Account, BillingEvent, BillingModel, CreditContext, CreditTransaction, Credits, HoldReceipt,
    OperationKind, PackageType,
};
use outreach_store::{LedgerEntry, LedgerStore, ResetResult};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CreditConfig, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use crate::error::CreditError;
use crate::metrics;
use crate::services::holds::HoldManager;

/// Preflight result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditCheck {
    pub has_enough: bool,
    /// Balance minus the outstanding hold.
    pub available: Credits,
    pub held: Credits,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditBalance {
    pub total: Credits,
    pub held: Credits,
    pub available: Credits,
    pub package_type: PackageType,
    pub billing_model: BillingModel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeductionReceipt {
    pub new_balance: Credits,
    pub transaction_id: String,
}

/// Outcome of `reset_free_credits`. Not applicable is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetOutcome {
    pub applied: bool,
    pub old_balance: Credits,
    pub new_balance: Credits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

#[derive(Clone)]
pub struct CreditService {
    ledger: Arc<dyn LedgerStore>,
    holds: HoldManager,
    config: Arc<CreditConfig>,
}

impl CreditService {
    pub fn new(ledger: Arc<dyn LedgerStore>, holds: HoldManager, config: Arc<CreditConfig>) -> Self {
        Self {
            ledger,
            holds,
            config,
        }
    }

    pub fn holds(&self) -> &HoldManager {
        &self.holds
    }

    pub fn config(&self) -> &CreditConfig {
        &self.config
    }

    // =========================================================================
    // Hold / commit protocol
    // =========================================================================

    pub async fn check_credits(
        &self,
        user_id: &str,
        required: Credits,
    ) -> Result<CreditCheck, CreditError> {
        let balance = self.ledger.get_balance(user_id).await?;
        let held = self.holds.held_amount(user_id).await?;
        let available = balance.saturating_sub_floor(held);

        Ok(CreditCheck {
            has_enough: available >= required,
            available,
            held,
        })
    }

    pub async fn create_credit_hold(
        &self,
        user_id: &str,
        amount: Credits,
        operation: OperationKind,
    ) -> Result<HoldReceipt, CreditError> {
        self.holds.create(user_id, amount, operation).await
    }

    pub async fn release_credit_hold(&self, user_id: &str) -> Result<bool, CreditError> {
        self.holds.release(user_id).await
    }

    /// Charge `amount`, then release the user's hold.
    ///
    /// The release is unconditional: whatever hold the user has is dropped,
    /// which is only correct while a user can hold at most one reservation.
    /// A failed deduction leaves the hold in place.
    pub async fn deduct_credits(
        &self,
        user_id: &str,
        amount: Credits,
        context: &CreditContext,
    ) -> Result<DeductionReceipt, CreditError> {
        let entry = self.ledger.apply_deduction(user_id, amount, context).await?;

        metrics::record_deduction(context.operation, amount);
        info!(
            user_id = %user_id,
            amount = %amount,
            operation = %context.operation,
            new_balance = %entry.new_balance,
            transaction_id = %entry.transaction.id,
            "Deducted credits"
        );

        // The charge is committed; a stuck hold only delays availability until the sweep.
        if let Err(e) = self.holds.release(user_id).await {
            warn!(user_id = %user_id, error = %e, "Failed to release hold after deduction");
        }

        Ok(DeductionReceipt {
            new_balance: entry.new_balance,
            transaction_id: entry.transaction.id,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_credit_balance(&self, user_id: &str) -> Result<CreditBalance, CreditError> {
        let account = self.ledger.get_account(user_id).await?;
        let held = self.holds.held_amount(user_id).await?;
        let total = account.credits_remaining;

        Ok(CreditBalance {
            total,
            held,
            available: total.saturating_sub_floor(held),
            package_type: account.package_type,
            billing_model: account.billing_model,
        })
    }

    /// Newest first. `limit` defaults to 20 and is clamped to 1..=100.
    pub async fn get_credit_history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CreditTransaction>, CreditError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        // Unknown users get AccountNotFound rather than an empty page
        self.ledger.get_account(user_id).await?;
        Ok(self.ledger.list_transactions(user_id, limit).await?)
    }

    // =========================================================================
    // Allowances
    // =========================================================================

    /// Raise a free account's balance to the floor.
    ///
    /// Paid accounts and balances already at the floor return `applied: false`.
    pub async fn reset_free_credits(&self, user_id: &str) -> Result<ResetOutcome, CreditError> {
        let account = self.ledger.get_account(user_id).await?;
        let balance = account.credits_remaining;

        if !account.package_type.is_free() {
            debug!(user_id = %user_id, package = %account.package_type, "Reset skipped for paid account");
            metrics::record_reset(false);
            return Ok(ResetOutcome {
                applied: false,
                old_balance: balance,
                new_balance: balance,
                reason: Some("not_free_tier"),
            });
        }

        let outcome = match self
            .ledger
            .apply_reset(user_id, self.config.free_tier_floor)
            .await?
        {
            ResetResult::Applied(entry) => {
                info!(
                    user_id = %user_id,
                    old_balance = %entry.transaction.balance_before,
                    new_balance = %entry.new_balance,
                    "Reset free credits"
                );
                ResetOutcome {
                    applied: true,
                    old_balance: entry.transaction.balance_before,
                    new_balance: entry.new_balance,
                    reason: None,
                }
            }
            ResetResult::AlreadyAtFloor { balance } => ResetOutcome {
                applied: false,
                old_balance: balance,
                new_balance: balance,
                reason: Some("already_at_floor"),
            },
        };

        metrics::record_reset(outcome.applied);
        Ok(outcome)
    }

    /// Create the user's account with the signup grant unless it exists.
    pub async fn ensure_account(
        &self,
        user_id: &str,
        email: Option<String>,
    ) -> Result<Account, CreditError> {
        let account = Account::new_free(user_id, email, self.config.signup_credits);
        let stored = self.ledger.create_account(account).await?;
        debug!(user_id = %user_id, balance = %stored.credits_remaining, "Account ready");
        Ok(stored)
    }

    /// Apply a subscription change pushed by the billing provider.
    ///
    /// Monthly plans replace the balance with the renewable amount and move
    /// the account onto the plan; one-time purchases only add to the balance.
    /// A redelivered event (same `event_id`) returns the original entry.
    pub async fn apply_billing_event(&self, event: &BillingEvent) -> Result<LedgerEntry, CreditError> {
        if event.renewable_credits.is_negative() {
            return Err(CreditError::InvalidAmount(event.renewable_credits));
        }
        let grant = self
            .config
            .plans
            .resolve(event)
            .ok_or_else(|| CreditError::UnknownPlan(event.plan_code.clone()))?;

        let entry = self.ledger.apply_allowance(&event.user_id, &grant).await?;

        metrics::record_allowance(&event.plan_code);
        info!(
            user_id = %event.user_id,
            plan_code = %event.plan_code,
            billing_model = %event.billing_model,
            new_balance = %entry.new_balance,
            transaction_id = %entry.transaction.id,
            "Applied billing allowance"
        );
        Ok(entry)
    }

    /// Readiness probe for the ledger backend.
    pub async fn ping(&self) -> Result<(), CreditError> {
        Ok(self.ledger.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use outreach_models::TransactionKind;
    use outreach_store::{MemoryHoldStore, MemoryLedger};

    fn service() -> (CreditService, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let holds = HoldManager::new(
            Arc::new(MemoryHoldStore::new()),
            ledger.clone(),
            Duration::from_secs(3600),
        );
        let service = CreditService::new(ledger.clone(), holds, Arc::new(CreditConfig::default()));
        (service, ledger)
    }

    #[tokio::test]
    async fn test_ensure_account_is_idempotent() {
        let (credits, _) = service();
        let first = credits.ensure_account("u1", Some("a@b.c".into())).await.unwrap();
        assert_eq!(first.credits_remaining, Credits::whole(7));

        credits
            .deduct_credits(
                "u1",
                Credits::whole(1),
                &CreditContext::new(OperationKind::Scrape, "scrape"),
            )
            .await
            .unwrap();

        let again = credits.ensure_account("u1", None).await.unwrap();
        assert_eq!(again.credits_remaining, Credits::whole(6));
    }

    #[tokio::test]
    async fn test_check_accounts_for_hold() {
        let (credits, _) = service();
        credits.ensure_account("u1", None).await.unwrap();
        credits
            .create_credit_hold("u1", Credits::whole(5), OperationKind::Scrape)
            .await
            .unwrap();

        let check = credits.check_credits("u1", Credits::whole(3)).await.unwrap();
        assert_eq!(
            check,
            CreditCheck {
                has_enough: false,
                available: Credits::whole(2),
                held: Credits::whole(5),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_deduction_keeps_hold() {
        let (credits, ledger) = service();
        credits.ensure_account("u1", None).await.unwrap();
        credits
            .create_credit_hold("u1", Credits::whole(1), OperationKind::Scrape)
            .await
            .unwrap();

        ledger.fail_next_writes(1);
        let err = credits
            .deduct_credits(
                "u1",
                Credits::whole(1),
                &CreditContext::new(OperationKind::Scrape, "scrape"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::LedgerWriteFailed(_)));
        assert_eq!(credits.holds().held_amount("u1").await.unwrap(), Credits::whole(1));
    }

    #[tokio::test]
    async fn test_history_default_and_clamp() {
        let (credits, _) = service();
        credits.ensure_account("u1", None).await.unwrap();
        for _ in 0..12 {
            let ctx = CreditContext::new(OperationKind::Message, "message");
            credits
                .deduct_credits("u1", Credits::from_minor(50), &ctx)
                .await
                .unwrap();
        }

        assert_eq!(credits.get_credit_history("u1", None).await.unwrap().len(), 12);
        assert_eq!(credits.get_credit_history("u1", Some(0)).await.unwrap().len(), 1);
        assert_eq!(credits.get_credit_history("u1", Some(5)).await.unwrap().len(), 5);

        let newest = &credits.get_credit_history("u1", Some(1)).await.unwrap()[0];
        assert_eq!(newest.balance_after, Credits::from_minor(100));
        assert_eq!(newest.kind, TransactionKind::Deduction);
    }

    #[tokio::test]
    async fn test_history_unknown_account() {
        let (credits, _) = service();
        assert!(matches!(
            credits.get_credit_history("ghost", None).await,
            Err(CreditError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_skips_paid_accounts() {
        let (credits, _) = service();
        credits.ensure_account("u1", None).await.unwrap();
        credits
            .apply_billing_event(&BillingEvent {
                user_id: "u1".into(),
                plan_code: "starter-monthly".into(),
                renewable_credits: Credits::whole(2),
                billing_model: BillingModel::Monthly,
                event_id: None,
            })
            .await
            .unwrap();

        let outcome = credits.reset_free_credits("u1").await.unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.reason, Some("not_free_tier"));
        assert_eq!(outcome.new_balance, Credits::whole(2));
    }

    fn pack_event(event_id: Option<&str>) -> BillingEvent {
        BillingEvent {
            user_id: "u1".into(),
            plan_code: "credits-pack".into(),
            renewable_credits: Credits::ZERO,
            billing_model: BillingModel::OneTime,
            event_id: event_id.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_billing_monthly_replaces_one_time_adds() {
        let (credits, _) = service();
        credits.ensure_account("u1", None).await.unwrap();

        let monthly = credits
            .apply_billing_event(&BillingEvent {
                user_id: "u1".into(),
                plan_code: "pro-monthly".into(),
                renewable_credits: Credits::ZERO,
                billing_model: BillingModel::Monthly,
                event_id: Some("ev_1".into()),
            })
            .await
            .unwrap();
        assert_eq!(monthly.new_balance, Credits::whole(200));

        let pack = credits
            .apply_billing_event(&BillingEvent {
                user_id: "u1".into(),
                plan_code: "credits-pack".into(),
                renewable_credits: Credits::whole(25),
                billing_model: BillingModel::OneTime,
                event_id: None,
            })
            .await
            .unwrap();
        assert_eq!(pack.new_balance, Credits::whole(225));

        // A pack on top of a subscription keeps the subscription
        let balance = credits.get_credit_balance("u1").await.unwrap();
        assert_eq!(balance.package_type, PackageType::Pro);
        assert_eq!(balance.billing_model, BillingModel::Monthly);
    }

    #[tokio::test]
    async fn test_free_user_pack_keeps_free_tier_reset() {
        let (credits, _) = service();
        credits.ensure_account("u1", None).await.unwrap();
        credits
            .deduct_credits(
                "u1",
                Credits::whole(7),
                &CreditContext::new(OperationKind::Scrape, "scrape"),
            )
            .await
            .unwrap();

        let pack = credits.apply_billing_event(&pack_event(Some("ev_pack"))).await.unwrap();
        assert_eq!(pack.new_balance, Credits::whole(25));

        let balance = credits.get_credit_balance("u1").await.unwrap();
        assert_eq!(balance.package_type, PackageType::Free);

        // Still on the free tier: at or above the floor, nothing to do
        let outcome = credits.reset_free_credits("u1").await.unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.reason, Some("already_at_floor"));
    }

    #[tokio::test]
    async fn test_redelivered_billing_event_applies_once() {
        let (credits, ledger) = service();
        credits.ensure_account("u1", None).await.unwrap();

        let first = credits.apply_billing_event(&pack_event(Some("ev_same"))).await.unwrap();
        let again = credits.apply_billing_event(&pack_event(Some("ev_same"))).await.unwrap();
        assert_eq!(first.new_balance, Credits::whole(32));
        assert_eq!(again.transaction.id, first.transaction.id);
        assert_eq!(ledger.get_balance("u1").await.unwrap(), Credits::whole(32));

        // Distinct events both count
        credits.apply_billing_event(&pack_event(Some("ev_other"))).await.unwrap();
        assert_eq!(ledger.get_balance("u1").await.unwrap(), Credits::whole(57));
    }

    #[tokio::test]
    async fn test_billing_unknown_plan() {
        let (credits, _) = service();
        credits.ensure_account("u1", None).await.unwrap();
        let err = credits
            .apply_billing_event(&BillingEvent {
                user_id: "u1".into(),
                plan_code: "enterprise".into(),
                renewable_credits: Credits::whole(5),
                billing_model: BillingModel::Monthly,
                event_id: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, CreditError::UnknownPlan("enterprise".into()));
    }
}
