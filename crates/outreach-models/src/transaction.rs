//! Credit ledger transaction models.
//!
//! Every balance change produces exactly one immutable transaction. The log
//! is the source of truth; the stored balance on the account is a projection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::billing::AllowanceGrant;
use crate::credits::Credits;

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Charge for a completed paid operation.
    Deduction,
    /// Free-tier allowance raised to its floor.
    Reset,
    /// Allowance set or topped up by the billing provider.
    Allowance,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deduction => "deduction",
            Self::Reset => "reset",
            Self::Allowance => "allowance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deduction" => Some(Self::Deduction),
            "reset" => Some(Self::Reset),
            "allowance" => Some(Self::Allowance),
            _ => None,
        }
    }
}

/// Paid action a hold or deduction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// LinkedIn profile extraction through the scraping provider.
    Scrape,
    /// Outreach message generated by the LLM.
    Message,
    /// Email address lookup.
    EmailLookup,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Message => "message",
            Self::EmailLookup => "email_lookup",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Scrape => "Profile Extraction",
            Self::Message => "Message Generation",
            Self::EmailLookup => "Email Lookup",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scrape" => Some(Self::Scrape),
            "message" => Some(Self::Message),
            "email_lookup" => Some(Self::EmailLookup),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreditTransaction {
    /// Unique identifier (UUID)
    pub id: String,

    pub user_id: String,

    pub kind: TransactionKind,

    /// Paid operation for deductions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,

    /// Signed balance change: negative for deductions.
    pub credits_change: Credits,

    pub balance_before: Credits,

    pub balance_after: Credits,

    pub description: String,

    /// Free-form context (operation name, target, plan code...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Deduction of `amount` from `balance_before`.
    pub fn deduction(
        user_id: impl Into<String>,
        amount: Credits,
        balance_before: Credits,
        context: &CreditContext,
    ) -> Self {
        let mut metadata = context.metadata.clone();
        metadata.insert("operation".to_string(), context.operation.as_str().to_string());
        Self::build(
            context.transaction_id.clone(),
            user_id.into(),
            TransactionKind::Deduction,
            Some(context.operation),
            balance_before,
            balance_before - amount,
            context.description.clone(),
            metadata,
        )
    }

    /// Free-tier reset from `balance_before` up to `floor`.
    pub fn reset(user_id: impl Into<String>, balance_before: Credits, floor: Credits) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("floor".to_string(), floor.to_string());
        Self::build(
            uuid::Uuid::new_v4().to_string(),
            user_id.into(),
            TransactionKind::Reset,
            None,
            balance_before,
            floor,
            format!("Free credits reset to {}", floor),
            metadata,
        )
    }

    /// Billing allowance change recorded under the grant's transaction id.
    pub fn allowance(
        user_id: impl Into<String>,
        grant: &AllowanceGrant,
        balance_before: Credits,
        balance_after: Credits,
    ) -> Self {
        Self::build(
            grant.transaction_id.clone(),
            user_id.into(),
            TransactionKind::Allowance,
            None,
            balance_before,
            balance_after,
            grant.description.clone(),
            grant.metadata.clone(),
        )
    }

    fn build(
        id: String,
        user_id: String,
        kind: TransactionKind,
        operation: Option<OperationKind>,
        balance_before: Credits,
        balance_after: Credits,
        description: String,
        mut metadata: HashMap<String, String>,
    ) -> Self {
        metadata.insert("balance_before".to_string(), balance_before.to_string());
        metadata.insert("balance_after".to_string(), balance_after.to_string());
        Self {
            id,
            user_id,
            kind,
            operation,
            credits_change: balance_after - balance_before,
            balance_before,
            balance_after,
            description,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Context for a paid operation's deduction.
///
/// Passed alongside holds and deductions to record what the credits paid for.
/// The transaction id is fixed when the context is built: a deduction retried
/// with the same context is applied at most once.
#[derive(Debug, Clone)]
pub struct CreditContext {
    pub operation: OperationKind,

    /// Id the deduction is recorded under.
    pub transaction_id: String,

    /// Human-readable description
    pub description: String,

    pub metadata: HashMap<String, String>,
}

impl CreditContext {
    pub fn new(operation: OperationKind, description: impl Into<String>) -> Self {
        Self {
            operation,
            transaction_id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = transaction_id.into();
        self
    }

    /// Merge metadata entries.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Add a single metadata entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduction_is_negative_change() {
        let ctx = CreditContext::new(OperationKind::Scrape, "Extract profile")
            .with_entry("target", "https://www.linkedin.com/in/someone");
        let tx = CreditTransaction::deduction("u1", Credits::whole(2), Credits::whole(10), &ctx);

        assert_eq!(tx.kind, TransactionKind::Deduction);
        assert_eq!(tx.operation, Some(OperationKind::Scrape));
        assert_eq!(tx.credits_change, Credits::whole(-2));
        assert_eq!(tx.balance_after, Credits::whole(8));
        assert_eq!(tx.metadata.get("operation").map(String::as_str), Some("scrape"));
        assert_eq!(tx.metadata.get("balance_before").map(String::as_str), Some("10.00"));
        assert_eq!(tx.metadata.get("balance_after").map(String::as_str), Some("8.00"));
        assert!(tx.metadata.contains_key("target"));
        assert_eq!(tx.id, ctx.transaction_id);
    }

    #[test]
    fn test_context_fixes_transaction_id() {
        let ctx = CreditContext::new(OperationKind::Message, "Generate message");
        let first = CreditTransaction::deduction("u1", Credits::whole(1), Credits::whole(5), &ctx);
        let retry = CreditTransaction::deduction("u1", Credits::whole(1), Credits::whole(5), &ctx);
        assert_eq!(first.id, retry.id);

        let other = CreditContext::new(OperationKind::Message, "Generate message");
        assert_ne!(other.transaction_id, ctx.transaction_id);
        assert_eq!(ctx.with_transaction_id("op-1").transaction_id, "op-1");
    }

    #[test]
    fn test_reset_change_is_difference_to_floor() {
        let tx = CreditTransaction::reset("u1", Credits::from_minor(250), Credits::whole(7));
        assert_eq!(tx.kind, TransactionKind::Reset);
        assert_eq!(tx.credits_change, Credits::from_minor(450));
        assert_eq!(tx.balance_after, Credits::whole(7));
    }

    #[test]
    fn test_operation_kind_names() {
        for op in [OperationKind::Scrape, OperationKind::Message, OperationKind::EmailLookup] {
            assert_eq!(OperationKind::from_str(op.as_str()), Some(op));
        }
        assert_eq!(OperationKind::from_str("video"), None);
        assert_eq!(TransactionKind::from_str("reset"), Some(TransactionKind::Reset));
    }
}
