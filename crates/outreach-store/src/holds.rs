//! Hold registry abstraction.
//!
//! At most one outstanding hold exists per user: the registry is keyed by
//! user id and `insert` refuses to overwrite. The check and the insert are a
//! single atomic step in every backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_models::Hold;
use thiserror::Error;

use crate::error::FirestoreError;

pub type HoldStoreResult<T> = Result<T, HoldStoreError>;

#[derive(Debug, Error)]
pub enum HoldStoreError {
    #[error("Corrupt hold record: {0}")]
    Corrupt(String),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),
}

/// Outcome of an insert attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldInsert {
    Inserted,
    /// The user already has an outstanding hold; nothing was written.
    Occupied(Hold),
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    async fn get(&self, user_id: &str) -> HoldStoreResult<Option<Hold>>;

    /// Insert unless the user already has a hold.
    async fn insert(&self, hold: Hold) -> HoldStoreResult<HoldInsert>;

    /// Remove the user's hold, whichever it is.
    async fn remove(&self, user_id: &str) -> HoldStoreResult<Option<Hold>>;

    /// Remove the user's hold only if it is `hold_id`.
    async fn remove_if(&self, user_id: &str, hold_id: &str) -> HoldStoreResult<Option<Hold>>;

    /// Remove every hold created before `cutoff`.
    async fn remove_expired(&self, cutoff: DateTime<Utc>) -> HoldStoreResult<Vec<Hold>>;

    /// Number of outstanding holds.
    async fn count(&self) -> HoldStoreResult<usize>;
}
