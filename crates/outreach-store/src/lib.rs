//! Credit ledger and hold persistence.
//!
//! This crate provides:
//! - The `LedgerStore` and `HoldStore` traits
//! - A Firestore REST backend with optimistic-concurrency commits
//! - An in-process backend for tests and single-node runs
//! - Service account authentication via gcp_auth

pub mod client;
pub mod error;
pub mod firestore_holds;
pub mod firestore_ledger;
pub mod holds;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;


pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use firestore_holds::FirestoreHoldStore;
pub use firestore_ledger::FirestoreLedger;
pub use holds::{HoldInsert, HoldStore, HoldStoreError, HoldStoreResult};
pub use ledger::{LedgerEntry, LedgerError, LedgerResult, LedgerStore, ResetResult};
pub use memory::{MemoryHoldStore, MemoryLedger};
pub use retry::RetryConfig;
