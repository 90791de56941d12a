//! Firestore-backed hold registry.
//!
//! One document per user at `credit_holds/{uid}`. The insert is create-only,
//! so the document id enforces the one-hold-per-user rule across every
//! process sharing the database. Deletes are guarded by the document's
//! `updateTime` so a sweep never removes a hold that replaced the one it read.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_models::{Credits, Hold, OperationKind};
use tracing::debug;

use crate::client::FirestoreClient;
use crate::holds::{HoldInsert, HoldStore, HoldStoreError, HoldStoreResult};
use crate::retry::{write_conflict_delay, MAX_WRITE_ATTEMPTS};
use crate::types::{Document, FieldOperator, StructuredQuery, ToFirestoreValue, Value, Write};

const HOLDS: &str = "credit_holds";

pub struct FirestoreHoldStore {
    client: FirestoreClient,
}

impl FirestoreHoldStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    async fn read(&self, user_id: &str) -> HoldStoreResult<Option<(Hold, Document)>> {
        let doc = self
            .client
            .with_retry("get_hold", || self.client.get_document(HOLDS, user_id))
            .await?;
        match doc {
            Some(doc) => Ok(Some((hold_from_document(&doc)?, doc))),
            None => Ok(None),
        }
    }

    /// Delete `doc` only if it has not changed since it was read.
    ///
    /// Returns false when a concurrent writer got there first.
    async fn delete_read(&self, user_id: &str, doc: &Document) -> HoldStoreResult<bool> {
        let update_time = doc
            .update_time
            .clone()
            .ok_or_else(|| HoldStoreError::Corrupt(format!("hold {} has no updateTime", user_id)))?;
        let name = self
            .client
            .full_document_name(&format!("{}/{}", HOLDS, user_id));

        match self.client.commit(vec![Write::delete_at(name, update_time)]).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_precondition_failed() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_matching<P>(&self, user_id: &str, matches: P) -> HoldStoreResult<Option<Hold>>
    where
        P: Fn(&Hold) -> bool + Send + Sync,
    {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let (hold, doc) = match self.read(user_id).await? {
                Some(found) => found,
                None => return Ok(None),
            };
            if !matches(&hold) {
                return Ok(None);
            }
            if self.delete_read(user_id, &doc).await? {
                return Ok(Some(hold));
            }
            debug!(user_id = %user_id, attempt = attempt + 1, "Hold changed during delete, retrying");
            tokio::time::sleep(write_conflict_delay(attempt)).await;
        }
        Ok(None)
    }
}

#[async_trait]
impl HoldStore for FirestoreHoldStore {
    async fn get(&self, user_id: &str) -> HoldStoreResult<Option<Hold>> {
        Ok(self.read(user_id).await?.map(|(hold, _)| hold))
    }

    async fn insert(&self, hold: Hold) -> HoldStoreResult<HoldInsert> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            match self
                .client
                .create_document(HOLDS, &hold.user_id, hold_to_fields(&hold))
                .await
            {
                Ok(_) => return Ok(HoldInsert::Inserted),
                Err(e) if e.is_already_exists() => {
                    if let Some(existing) = self.get(&hold.user_id).await? {
                        return Ok(HoldInsert::Occupied(existing));
                    }
                    // Released between our create and read; try again
                    tokio::time::sleep(write_conflict_delay(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(HoldStoreError::Firestore(
            crate::error::FirestoreError::PreconditionFailed(format!(
                "hold slot for {} kept changing",
                hold.user_id
            )),
        ))
    }

    async fn remove(&self, user_id: &str) -> HoldStoreResult<Option<Hold>> {
        self.remove_matching(user_id, |_| true).await
    }

    async fn remove_if(&self, user_id: &str, hold_id: &str) -> HoldStoreResult<Option<Hold>> {
        self.remove_matching(user_id, |h| h.hold_id == hold_id).await
    }

    async fn remove_expired(&self, cutoff: DateTime<Utc>) -> HoldStoreResult<Vec<Hold>> {
        let query = StructuredQuery::collection(HOLDS).with_filter(
            "created_at",
            FieldOperator::LessThan,
            cutoff.to_firestore_value(),
        );
        let docs = self
            .client
            .with_retry("list_expired_holds", || self.client.run_query("", query.clone()))
            .await?;

        let mut removed = Vec::new();
        for doc in docs {
            let hold = hold_from_document(&doc)?;
            if self.delete_read(&hold.user_id, &doc).await? {
                removed.push(hold);
            }
        }
        Ok(removed)
    }

    async fn count(&self) -> HoldStoreResult<usize> {
        let docs = self
            .client
            .run_query("", StructuredQuery::collection(HOLDS))
            .await?;
        Ok(docs.len())
    }
}

fn hold_to_fields(hold: &Hold) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("hold_id".to_string(), hold.hold_id.to_firestore_value());
    fields.insert("user_id".to_string(), hold.user_id.to_firestore_value());
    fields.insert("amount_minor".to_string(), hold.amount.minor().to_firestore_value());
    fields.insert("operation".to_string(), hold.operation.as_str().to_firestore_value());
    fields.insert("created_at".to_string(), hold.created_at.to_firestore_value());
    fields
}

fn hold_from_document(doc: &Document) -> HoldStoreResult<Hold> {
    let corrupt = |field: &str| {
        HoldStoreError::Corrupt(format!(
            "{} missing or malformed field {}",
            doc.name.as_deref().unwrap_or("hold"),
            field
        ))
    };
    let operation: String = doc.get("operation").ok_or_else(|| corrupt("operation"))?;

    Ok(Hold {
        hold_id: doc.get("hold_id").ok_or_else(|| corrupt("hold_id"))?,
        user_id: doc.get("user_id").ok_or_else(|| corrupt("user_id"))?,
        amount: Credits::from_minor(doc.get("amount_minor").ok_or_else(|| corrupt("amount_minor"))?),
        operation: OperationKind::from_str(&operation).ok_or_else(|| corrupt("operation"))?,
        created_at: doc.get("created_at").ok_or_else(|| corrupt("created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_document_round_trip() {
        let hold = Hold::new("u1", Credits::from_minor(150), OperationKind::EmailLookup);
        let doc = Document::new(hold_to_fields(&hold));
        let parsed = hold_from_document(&doc).unwrap();
        assert_eq!(parsed.hold_id, hold.hold_id);
        assert_eq!(parsed.amount, Credits::from_minor(150));
        assert_eq!(parsed.operation, OperationKind::EmailLookup);
    }

    #[test]
    fn test_hold_document_unknown_operation() {
        let hold = Hold::new("u1", Credits::whole(1), OperationKind::Scrape);
        let mut fields = hold_to_fields(&hold);
        fields.insert("operation".to_string(), "video".to_firestore_value());
        assert!(matches!(
            hold_from_document(&Document::new(fields)),
            Err(HoldStoreError::Corrupt(_))
        ));
    }
}
