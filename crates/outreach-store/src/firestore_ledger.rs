//! Firestore-backed ledger.
//!
//! Layout:
//! - `accounts/{uid}`: balance projection and plan fields
//! - `accounts/{uid}/credit_transactions/{txId}`: append-only log
//!
//! Every mutation reads the account with its `updateTime`, then commits the
//! account update (guarded by that `updateTime`) together with the
//! transaction insert (guarded by `exists=false`). A failed precondition
//! means another writer got there first, so the cycle is retried with
//! linear backoff. The transaction id is chosen by the caller and fixed for
//! the whole cycle: a commit whose response was lost, or a caller retrying
//! the same deduction or billing event, finds the stored transaction instead
//! of writing a second one.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_models::{
    Account, AllowanceGrant, BillingModel, CreditContext, CreditTransaction, Credits,
    OperationKind, PackageType, TransactionKind,
};
use tracing::{debug, info, warn};

use crate::client::FirestoreClient;
use crate::ledger::{
    allowance_balance, check_deduction, LedgerEntry, LedgerError, LedgerResult, LedgerStore,
    ResetResult,
};
use crate::metrics::record_conflict;
use crate::retry::{write_conflict_delay, MAX_WRITE_ATTEMPTS};
use crate::types::{
    Direction, Document, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value, Write,
};

const ACCOUNTS: &str = "accounts";
const TRANSACTIONS: &str = "credit_transactions";

/// Result of one read-modify-write cycle.
enum Mutation {
    Written(LedgerEntry),
    Unchanged(Account),
}

pub struct FirestoreLedger {
    client: FirestoreClient,
}

impl FirestoreLedger {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    fn transactions_path(user_id: &str) -> String {
        format!("{}/{}/{}", ACCOUNTS, user_id, TRANSACTIONS)
    }

    async fn read_account(&self, user_id: &str) -> LedgerResult<(Account, String)> {
        let doc = self
            .client
            .with_retry("get_account", || self.client.get_document(ACCOUNTS, user_id))
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))?;

        let update_time = doc
            .update_time
            .clone()
            .ok_or_else(|| LedgerError::Corrupt(format!("account {} has no updateTime", user_id)))?;
        Ok((account_from_document(&doc)?, update_time))
    }

    async fn find_transaction(
        &self,
        user_id: &str,
        tx_id: &str,
    ) -> LedgerResult<Option<CreditTransaction>> {
        let path = Self::transactions_path(user_id);
        let doc = self
            .client
            .with_retry("get_transaction", || self.client.get_document(&path, tx_id))
            .await?;
        doc.map(|d| transaction_from_document(&d)).transpose()
    }

    /// The stored transaction `tx_id` as a written entry, if it exists.
    async fn already_applied(&self, user_id: &str, tx_id: &str) -> LedgerResult<Option<Mutation>> {
        Ok(self.find_transaction(user_id, tx_id).await?.map(|stored| {
            debug!(user_id = %user_id, tx_id = %tx_id, "Transaction had already been applied");
            Mutation::Written(LedgerEntry {
                new_balance: stored.balance_after,
                transaction: stored,
            })
        }))
    }

    /// Run a read-modify-write cycle until it commits or attempts run out.
    ///
    /// `plan` sees the freshly read account and returns the updated account
    /// and the transaction to append, or `None` to write nothing. The
    /// transaction is stored under `tx_id`.
    async fn mutate<F>(
        &self,
        user_id: &str,
        operation: &str,
        tx_id: &str,
        mut plan: F,
    ) -> LedgerResult<Mutation>
    where
        F: FnMut(&Account) -> LedgerResult<Option<(Account, CreditTransaction)>> + Send,
    {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let (account, update_time) = self.read_account(user_id).await?;

            let (updated, mut tx) = match plan(&account) {
                Ok(Some(change)) => change,
                Ok(None) => return Ok(Mutation::Unchanged(account)),
                // A repeat of an applied write can fail validation against the
                // balance it already changed
                Err(e) => match self.already_applied(user_id, tx_id).await? {
                    Some(done) => return Ok(done),
                    None => return Err(e),
                },
            };
            tx.id = tx_id.to_string();

            let account_fields = account_to_fields(&updated);
            let mask: Vec<String> = account_fields.keys().cloned().collect();
            let writes = vec![
                Write::update_at(
                    Document::named(
                        self.client.full_document_name(&format!("{}/{}", ACCOUNTS, user_id)),
                        account_fields,
                    ),
                    mask,
                    update_time,
                ),
                Write::create(Document::named(
                    self.client.full_document_name(&format!(
                        "{}/{}",
                        Self::transactions_path(user_id),
                        tx_id
                    )),
                    transaction_to_fields(&tx),
                )),
            ];

            match self.client.commit(writes).await {
                Ok(_) => {
                    return Ok(Mutation::Written(LedgerEntry {
                        new_balance: tx.balance_after,
                        transaction: tx,
                    }))
                }
                Err(e) if e.is_precondition_failed() || e.is_already_exists() || e.is_retryable() => {
                    // The commit may have landed even though we saw an error,
                    // or an earlier call already stored this transaction
                    if let Some(done) = self.already_applied(user_id, tx_id).await? {
                        return Ok(done);
                    }

                    record_conflict(operation);
                    debug!(
                        user_id = %user_id,
                        operation = %operation,
                        attempt = attempt + 1,
                        error = %e,
                        "Ledger write lost a race, retrying"
                    );
                    tokio::time::sleep(write_conflict_delay(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(user_id = %user_id, operation = %operation, "Ledger write failed after retries");
        Err(LedgerError::WriteConflict {
            user_id: user_id.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }
}

#[async_trait]
impl LedgerStore for FirestoreLedger {
    async fn create_account(&self, account: Account) -> LedgerResult<Account> {
        match self
            .client
            .create_document(ACCOUNTS, &account.user_id, account_to_fields(&account))
            .await
        {
            Ok(_) => {
                info!(user_id = %account.user_id, credits = %account.credits_remaining, "Created account");
                Ok(account)
            }
            Err(e) if e.is_already_exists() => self.get_account(&account.user_id).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn get_account(&self, user_id: &str) -> LedgerResult<Account> {
        Ok(self.read_account(user_id).await?.0)
    }

    async fn apply_deduction(
        &self,
        user_id: &str,
        amount: Credits,
        context: &CreditContext,
    ) -> LedgerResult<LedgerEntry> {
        let mutation = self
            .mutate(user_id, "deduction", &context.transaction_id, |account| {
                let balance = account.credits_remaining;
                check_deduction(balance, amount)?;
                let tx = CreditTransaction::deduction(user_id, amount, balance, context);
                let mut updated = account.clone();
                updated.credits_remaining = tx.balance_after;
                updated.updated_at = tx.created_at;
                Ok(Some((updated, tx)))
            })
            .await?;

        match mutation {
            Mutation::Written(entry) => Ok(entry),
            Mutation::Unchanged(account) => Err(LedgerError::Corrupt(format!(
                "deduction for {} produced no write",
                account.user_id
            ))),
        }
    }

    async fn apply_reset(&self, user_id: &str, floor: Credits) -> LedgerResult<ResetResult> {
        let tx_id = uuid::Uuid::new_v4().to_string();
        let mutation = self
            .mutate(user_id, "reset", &tx_id, |account| {
                let balance = account.credits_remaining;
                if balance >= floor {
                    return Ok(None);
                }
                let tx = CreditTransaction::reset(user_id, balance, floor);
                let mut updated = account.clone();
                updated.credits_remaining = floor;
                updated.updated_at = tx.created_at;
                Ok(Some((updated, tx)))
            })
            .await?;

        Ok(match mutation {
            Mutation::Written(entry) => ResetResult::Applied(entry),
            Mutation::Unchanged(account) => ResetResult::AlreadyAtFloor {
                balance: account.credits_remaining,
            },
        })
    }

    async fn apply_allowance(
        &self,
        user_id: &str,
        grant: &AllowanceGrant,
    ) -> LedgerResult<LedgerEntry> {
        let mutation = self
            .mutate(user_id, "allowance", &grant.transaction_id, |account| {
                let balance = account.credits_remaining;
                let new_balance = allowance_balance(balance, grant)?;
                let tx = CreditTransaction::allowance(user_id, grant, balance, new_balance);
                let mut updated = account.clone();
                updated.credits_remaining = new_balance;
                if grant.updates_plan() {
                    updated.package_type = grant.package_type;
                    updated.billing_model = grant.billing_model;
                    updated.plan_code = Some(grant.plan_code.clone());
                }
                updated.updated_at = tx.created_at;
                Ok(Some((updated, tx)))
            })
            .await?;

        match mutation {
            Mutation::Written(entry) => Ok(entry),
            Mutation::Unchanged(account) => Err(LedgerError::Corrupt(format!(
                "allowance for {} produced no write",
                account.user_id
            ))),
        }
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> LedgerResult<Vec<CreditTransaction>> {
        let parent = format!("{}/{}", ACCOUNTS, user_id);
        let query = StructuredQuery::collection(TRANSACTIONS)
            .order_by("created_at", Direction::Descending)
            .limit(limit.min(u32::MAX as usize) as u32);

        let docs = self
            .client
            .with_retry("list_transactions", || {
                self.client.run_query(&parent, query.clone())
            })
            .await?;

        docs.iter().map(transaction_from_document).collect()
    }

    async fn ping(&self) -> LedgerResult<()> {
        self.client.get_document(ACCOUNTS, "__ping__").await?;
        Ok(())
    }
}

// =============================================================================
// Document mapping
// =============================================================================

fn account_to_fields(account: &Account) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), account.user_id.to_firestore_value());
    fields.insert("email".to_string(), account.email.to_firestore_value());
    fields.insert(
        "credits_remaining_minor".to_string(),
        account.credits_remaining.minor().to_firestore_value(),
    );
    fields.insert(
        "opening_balance_minor".to_string(),
        account.opening_balance.minor().to_firestore_value(),
    );
    fields.insert(
        "package_type".to_string(),
        account.package_type.as_str().to_firestore_value(),
    );
    fields.insert(
        "billing_model".to_string(),
        account.billing_model.as_str().to_firestore_value(),
    );
    fields.insert("plan_code".to_string(), account.plan_code.to_firestore_value());
    fields.insert("created_at".to_string(), account.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), account.updated_at.to_firestore_value());
    fields
}

fn required<T: FromFirestoreValue>(doc: &Document, field: &str) -> LedgerResult<T> {
    doc.get::<T>(field).ok_or_else(|| {
        LedgerError::Corrupt(format!(
            "{} missing or malformed field {}",
            doc.name.as_deref().unwrap_or("document"),
            field
        ))
    })
}

fn account_from_document(doc: &Document) -> LedgerResult<Account> {
    let billing_model: String = required(doc, "billing_model")?;
    Ok(Account {
        user_id: required(doc, "user_id")?,
        email: doc.get("email"),
        credits_remaining: Credits::from_minor(required(doc, "credits_remaining_minor")?),
        opening_balance: Credits::from_minor(required(doc, "opening_balance_minor")?),
        package_type: PackageType::from_str(&required::<String>(doc, "package_type")?),
        billing_model: BillingModel::from_str(&billing_model).ok_or_else(|| {
            LedgerError::Corrupt(format!("unknown billing model {}", billing_model))
        })?,
        plan_code: doc.get("plan_code"),
        created_at: required::<DateTime<Utc>>(doc, "created_at")?,
        updated_at: required::<DateTime<Utc>>(doc, "updated_at")?,
    })
}

fn transaction_to_fields(tx: &CreditTransaction) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("id".to_string(), tx.id.to_firestore_value());
    fields.insert("user_id".to_string(), tx.user_id.to_firestore_value());
    fields.insert("kind".to_string(), tx.kind.as_str().to_firestore_value());
    fields.insert(
        "operation".to_string(),
        tx.operation.map(|o| o.as_str()).to_firestore_value(),
    );
    fields.insert(
        "credits_change_minor".to_string(),
        tx.credits_change.minor().to_firestore_value(),
    );
    fields.insert(
        "balance_before_minor".to_string(),
        tx.balance_before.minor().to_firestore_value(),
    );
    fields.insert(
        "balance_after_minor".to_string(),
        tx.balance_after.minor().to_firestore_value(),
    );
    fields.insert("description".to_string(), tx.description.to_firestore_value());
    fields.insert("metadata".to_string(), tx.metadata.to_firestore_value());
    fields.insert("created_at".to_string(), tx.created_at.to_firestore_value());
    fields
}

fn transaction_from_document(doc: &Document) -> LedgerResult<CreditTransaction> {
    let kind: String = required(doc, "kind")?;
    Ok(CreditTransaction {
        id: required(doc, "id")?,
        user_id: required(doc, "user_id")?,
        kind: TransactionKind::from_str(&kind)
            .ok_or_else(|| LedgerError::Corrupt(format!("unknown transaction kind {}", kind)))?,
        operation: doc
            .get::<String>("operation")
            .and_then(|s| OperationKind::from_str(&s)),
        credits_change: Credits::from_minor(required(doc, "credits_change_minor")?),
        balance_before: Credits::from_minor(required(doc, "balance_before_minor")?),
        balance_after: Credits::from_minor(required(doc, "balance_after_minor")?),
        description: doc.get("description").unwrap_or_default(),
        metadata: doc.get("metadata").unwrap_or_default(),
        created_at: required::<DateTime<Utc>>(doc, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_document_round_trip() {
        let mut account = Account::new_free("u1", Some("a@b.co".into()), Credits::from_minor(750));
        account.plan_code = Some("pro-monthly".into());
        let doc = Document::named("projects/p/databases/d/documents/accounts/u1", account_to_fields(&account));

        let parsed = account_from_document(&doc).unwrap();
        assert_eq!(parsed.credits_remaining, Credits::from_minor(750));
        assert_eq!(parsed.email.as_deref(), Some("a@b.co"));
        assert_eq!(parsed.plan_code.as_deref(), Some("pro-monthly"));
        assert_eq!(parsed.package_type, PackageType::Free);
    }

    #[test]
    fn test_account_missing_balance_is_corrupt() {
        let account = Account::new_free("u1", None, Credits::whole(7));
        let mut fields = account_to_fields(&account);
        fields.remove("credits_remaining_minor");
        let doc = Document::new(fields);
        assert!(matches!(account_from_document(&doc), Err(LedgerError::Corrupt(_))));
    }

    #[test]
    fn test_transaction_fields_use_minor_units() {
        let ctx = CreditContext::new(OperationKind::Message, "Generate message");
        let tx = CreditTransaction::deduction("u1", Credits::from_minor(50), Credits::whole(3), &ctx);
        let fields = transaction_to_fields(&tx);
        assert_eq!(fields.get("credits_change_minor"), Some(&Value::IntegerValue("-50".into())));

        let parsed = transaction_from_document(&Document::new(fields)).unwrap();
        assert_eq!(parsed.operation, Some(OperationKind::Message));
        assert_eq!(parsed.balance_after, Credits::from_minor(250));
        assert_eq!(parsed.metadata, tx.metadata);
    }
}
