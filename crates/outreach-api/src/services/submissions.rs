//! In-flight submission tracking.
//!
//! A claim on `(user, key)` is taken before any hold exists and dropped when
//! the paid operation finishes, so a second submission of the same unit of
//! work is refused without touching the balance.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::CreditError;

type Entry = (String, String);

#[derive(Clone, Default)]
pub struct SubmissionGuard {
    inflight: Arc<Mutex<HashSet<Entry>>>,
}

impl SubmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Entry>> {
        // The set stays consistent even if a holder panicked
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `key` for `user_id`; fails with `DuplicateSubmission` if it is in flight.
    pub fn claim(&self, user_id: &str, key: &str) -> Result<SubmissionClaim, CreditError> {
        let entry = (user_id.to_string(), key.to_string());
        if !self.lock().insert(entry.clone()) {
            debug!(user_id = %user_id, key = %key, "Rejected duplicate submission");
            return Err(CreditError::DuplicateSubmission(key.to_string()));
        }
        Ok(SubmissionClaim {
            guard: self.clone(),
            entry: Some(entry),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

/// Releases the claim when dropped.
pub struct SubmissionClaim {
    guard: SubmissionGuard,
    entry: Option<Entry>,
}

impl Drop for SubmissionClaim {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.guard.lock().remove(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_blocks_duplicate_until_dropped() {
        let guard = SubmissionGuard::new();
        let claim = guard.claim("u1", "https://www.linkedin.com/in/jane").unwrap();

        assert!(matches!(
            guard.claim("u1", "https://www.linkedin.com/in/jane"),
            Err(CreditError::DuplicateSubmission(_))
        ));
        // Other users and other keys are independent
        assert!(guard.claim("u2", "https://www.linkedin.com/in/jane").is_ok());
        assert!(guard.claim("u1", "https://www.linkedin.com/in/john").is_ok());

        drop(claim);
        assert_eq!(guard.in_flight(), 0);
        let _again = tokio_test::assert_ok!(guard.claim("u1", "https://www.linkedin.com/in/jane"));
        assert_eq!(guard.in_flight(), 1);
    }
}
