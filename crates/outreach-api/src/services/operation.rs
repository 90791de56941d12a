//! Paid operation runner.
//!
//! Every paid feature goes through the same shape:
//!
//! ```text
//! claim -> check -> hold -> call (with timeout) -> deduct + release
//!                                              \-> release only
//! ```
//!
//! The held amount is fixed before the call and is exactly what gets
//! deducted. A provider failure or timeout never charges. If the future is
//! dropped mid-flight (client disconnect) a guard releases the hold; the TTL
//! sweep covers a crashed process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use outreach_models::{CreditContext, Credits, OperationKind};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::OperationConfig;
use crate::error::CreditError;
use crate::metrics;
use crate::providers::ProviderError;
use crate::services::credit::{CreditService, DeductionReceipt};
use crate::services::holds::HoldManager;
use crate::services::submissions::SubmissionGuard;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Credit(#[from] CreditError),

    #[error("{0}")]
    InvalidRequest(String),

    /// The provider failed. Nothing was charged.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// The provider did not answer in time. Nothing was charged.
    #[error("{operation} did not complete within {timeout:?}")]
    Timeout {
        operation: OperationKind,
        timeout: Duration,
    },
}

/// One paid action.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub user_id: String,
    pub operation: OperationKind,
    pub price: Credits,
    /// Identifies the unit of work for duplicate detection.
    pub dedupe_key: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

impl OperationRequest {
    pub fn new(
        user_id: impl Into<String>,
        operation: OperationKind,
        price: Credits,
        dedupe_key: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            operation,
            price,
            dedupe_key: dedupe_key.into(),
            description: operation.label().to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn context(&self) -> CreditContext {
        CreditContext::new(self.operation, self.description.clone())
            .with_metadata(self.metadata.clone())
    }
}

/// A paid action that completed and was charged.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome<T> {
    pub result: T,
    pub charged: Credits,
    pub new_balance: Credits,
    pub transaction_id: String,
}

/// Releases the hold if the runner is dropped before it decides.
struct HoldGuard {
    holds: HoldManager,
    pending: Option<(String, String)>,
}

impl HoldGuard {
    fn new(holds: HoldManager, user_id: &str, hold_id: &str) -> Self {
        Self {
            holds,
            pending: Some((user_id.to_string(), hold_id.to_string())),
        }
    }

    fn disarm(&mut self) {
        self.pending = None;
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        let Some((user_id, hold_id)) = self.pending.take() else {
            return;
        };
        let holds = self.holds.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = holds.release_hold(&user_id, &hold_id).await {
                        warn!(user_id = %user_id, hold_id = %hold_id, error = %e, "Failed to release abandoned hold");
                    }
                });
            }
            Err(_) => {
                warn!(user_id = %user_id, hold_id = %hold_id, "No runtime to release abandoned hold; left to the sweep");
            }
        }
    }
}

#[derive(Clone)]
pub struct PaidOperationRunner {
    credits: CreditService,
    submissions: SubmissionGuard,
    config: Arc<OperationConfig>,
}

impl PaidOperationRunner {
    pub fn new(credits: CreditService, submissions: SubmissionGuard, config: Arc<OperationConfig>) -> Self {
        Self {
            credits,
            submissions,
            config,
        }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// Run `call` as a paid action.
    pub async fn run<T, F, Fut>(
        &self,
        request: OperationRequest,
        timeout: Duration,
        call: F,
    ) -> Result<OperationOutcome<T>, OperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let user_id = request.user_id.as_str();
        let operation = request.operation;

        let result = self.run_inner(&request, timeout, call).await;

        let outcome = match &result {
            Ok(_) => "charged",
            Err(OperationError::Provider(_)) => "provider_failed",
            Err(OperationError::Timeout { .. }) => "timeout",
            Err(OperationError::Credit(e)) if e.is_retryable() => "deduct_failed",
            Err(_) => "rejected",
        };
        metrics::record_operation(operation, outcome, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            info!(user_id = %user_id, operation = %operation, outcome, error = %e, "Paid operation not charged");
        }
        result
    }

    async fn run_inner<T, F, Fut>(
        &self,
        request: &OperationRequest,
        timeout: Duration,
        call: F,
    ) -> Result<OperationOutcome<T>, OperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let user_id = request.user_id.as_str();
        let amount = request.price;

        // Duplicate check precedes the reservation
        let _claim = self.submissions.claim(user_id, &request.dedupe_key)?;

        let check = self.credits.check_credits(user_id, amount).await?;
        if !check.has_enough {
            return Err(CreditError::InsufficientCredits {
                available: check.available,
                held: check.held,
                required: amount,
            }
            .into());
        }

        let receipt = self
            .credits
            .create_credit_hold(user_id, amount, request.operation)
            .await?;
        let mut guard = HoldGuard::new(self.credits.holds().clone(), user_id, &receipt.hold_id);

        let failure = match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(result)) => {
                return match self.deduct_with_retry(request).await {
                    Ok(receipt) => {
                        guard.disarm();
                        Ok(OperationOutcome {
                            result,
                            charged: amount,
                            new_balance: receipt.new_balance,
                            transaction_id: receipt.transaction_id,
                        })
                    }
                    Err(e) => {
                        error!(
                            user_id = %user_id,
                            operation = %request.operation,
                            amount = %amount,
                            error = %e,
                            "Provider succeeded but deduction failed; releasing hold without charge"
                        );
                        self.release(user_id, guard).await;
                        Err(e.into())
                    }
                };
            }
            Ok(Err(e)) => OperationError::Provider(e),
            Err(_) => OperationError::Timeout {
                operation: request.operation,
                timeout,
            },
        };

        self.release(user_id, guard).await;
        Err(failure)
    }

    /// Deduct, retrying store aborts with linear backoff.
    async fn deduct_with_retry(
        &self,
        request: &OperationRequest,
    ) -> Result<DeductionReceipt, CreditError> {
        let context = request.context();
        let attempts = self.config.deduct_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .credits
                .deduct_credits(&request.user_id, request.price, &context)
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(CreditError::LedgerWriteFailed(msg)) if attempt < attempts => {
                    warn!(
                        user_id = %request.user_id,
                        attempt,
                        error = %msg,
                        "Deduction aborted, retrying"
                    );
                    tokio::time::sleep(self.config.deduct_retry_base * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Release after a failure. If the release itself fails the guard retries
    /// in the background, and the sweep is the last resort.
    async fn release(&self, user_id: &str, mut guard: HoldGuard) {
        match self.credits.release_credit_hold(user_id).await {
            Ok(_) => guard.disarm(),
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to release credit hold"),
        }
    }
}
