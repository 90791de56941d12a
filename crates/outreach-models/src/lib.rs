//! Shared data models for the outreach backend.
//!
//! This crate provides Serde-serializable types for:
//! - Fixed-point credit amounts
//! - Accounts, packages and billing models
//! - Ledger transactions and credit holds
//! - Billing events and the plan catalog
//! - Scrape job status

pub mod account;
pub mod billing;
pub mod credits;
pub mod hold;
pub mod pricing;
pub mod scrape;
pub mod transaction;

// Re-export common types
pub use account::{Account, BillingModel, PackageType};
pub use billing::{
    billing_transaction_id, AllowanceGrant, AllowanceMode, BillingEvent, PlanCatalog,
    PlanCatalogError, PlanEntry,
};
pub use credits::{Credits, CreditsParseError};
pub use hold::{
    Hold, HoldReceipt, DEFAULT_HOLD_TTL_SECS, DEFAULT_SWEEP_INTERVAL_SECS, MAX_HOLD_TTL_SECS,
};
pub use pricing::{
    EMAIL_LOOKUP_COST, FREE_TIER_FLOOR, MESSAGE_GENERATION_COST, PROFILE_SCRAPE_COST,
    SIGNUP_CREDITS,
};
pub use scrape::{canonical_profile_url, parse_web_url, ScrapePoll, ScrapeStatus};
pub use transaction::{CreditContext, CreditTransaction, OperationKind, TransactionKind};
