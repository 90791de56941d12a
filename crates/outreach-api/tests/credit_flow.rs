//! Hold/commit protocol against the in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use outreach_api::config::{CreditConfig, OperationConfig};
use outreach_api::error::CreditError;
use outreach_api::services::{
    CreditService, HoldManager, OperationError, OperationRequest, PaidOperationRunner,
    SubmissionGuard,
};
use outreach_api::providers::ProviderError;
use outreach_models::{Account, CreditContext, Credits, OperationKind};
use outreach_store::{LedgerStore, MemoryHoldStore, MemoryLedger};

struct Harness {
    ledger: Arc<MemoryLedger>,
    credits: CreditService,
    runner: PaidOperationRunner,
}

async fn harness(user_id: &str, balance: Credits) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    ledger
        .create_account(Account::new_free(user_id, None, balance))
        .await
        .unwrap();

    let holds = HoldManager::new(
        Arc::new(MemoryHoldStore::new()),
        ledger.clone(),
        Duration::from_secs(3600),
    );
    let credits = CreditService::new(ledger.clone(), holds, Arc::new(CreditConfig::default()));
    let config = OperationConfig {
        deduct_retry_base: Duration::from_millis(1),
        ..OperationConfig::default()
    };
    let runner = PaidOperationRunner::new(credits.clone(), SubmissionGuard::new(), Arc::new(config));

    Harness {
        ledger,
        credits,
        runner,
    }
}

fn scrape(user_id: &str, key: &str) -> OperationRequest {
    OperationRequest::new(user_id, OperationKind::Scrape, Credits::whole(2), key)
}

#[tokio::test]
async fn test_happy_path_charges_once_and_clears_hold() {
    let h = harness("u1", Credits::whole(10)).await;

    let receipt = h
        .credits
        .create_credit_hold("u1", Credits::whole(2), OperationKind::Scrape)
        .await
        .unwrap();
    assert_eq!(receipt.projected_remaining, Credits::whole(8));

    let context = CreditContext::new(OperationKind::Scrape, "Profile extraction");
    let deducted = h
        .credits
        .deduct_credits("u1", Credits::whole(2), &context)
        .await
        .unwrap();
    assert_eq!(deducted.new_balance, Credits::whole(8));

    let balance = h.credits.get_credit_balance("u1").await.unwrap();
    assert_eq!(balance.total, Credits::whole(8));
    assert_eq!(balance.held, Credits::ZERO);
    assert_eq!(balance.available, Credits::whole(8));
}

#[tokio::test]
async fn test_insufficient_funds_reports_shortfall() {
    let h = harness("u1", Credits::whole(1)).await;

    let err = h
        .credits
        .create_credit_hold("u1", Credits::whole(2), OperationKind::Scrape)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CreditError::InsufficientCredits {
            available: Credits::whole(1),
            held: Credits::ZERO,
            required: Credits::whole(2),
        }
    );
    assert_eq!(h.ledger.get_balance("u1").await.unwrap(), Credits::whole(1));
}

#[tokio::test]
async fn test_release_after_external_failure_restores_availability() {
    let h = harness("u1", Credits::whole(5)).await;

    h.credits
        .create_credit_hold("u1", Credits::whole(3), OperationKind::EmailLookup)
        .await
        .unwrap();
    let check = h.credits.check_credits("u1", Credits::whole(3)).await.unwrap();
    assert!(!check.has_enough);
    assert_eq!(check.available, Credits::whole(2));

    assert!(h.credits.release_credit_hold("u1").await.unwrap());

    let balance = h.credits.get_credit_balance("u1").await.unwrap();
    assert_eq!(balance.total, Credits::whole(5));
    assert_eq!(balance.held, Credits::ZERO);
    assert_eq!(balance.available, Credits::whole(5));
}

#[tokio::test]
async fn test_expired_hold_is_swept() {
    let h = harness("u1", Credits::whole(5)).await;

    h.credits
        .create_credit_hold("u1", Credits::whole(1), OperationKind::Scrape)
        .await
        .unwrap();

    let later = Utc::now() + chrono::Duration::seconds(3700);
    let swept = h.credits.holds().sweep_expired(later).await.unwrap();
    assert_eq!(swept.len(), 1);

    let balance = h.credits.get_credit_balance("u1").await.unwrap();
    assert_eq!(balance.held, Credits::ZERO);
    assert_eq!(balance.total, Credits::whole(5));
}

#[tokio::test]
async fn test_reset_is_idempotent_at_floor() {
    let h = harness("u1", Credits::whole(3)).await;

    let first = h.credits.reset_free_credits("u1").await.unwrap();
    assert!(first.applied);
    assert_eq!(first.new_balance, Credits::whole(7));

    let second = h.credits.reset_free_credits("u1").await.unwrap();
    assert!(!second.applied);
    assert_eq!(second.new_balance, Credits::whole(7));
    assert_eq!(second.reason, Some("already_at_floor"));
}

#[tokio::test]
async fn test_concurrent_holds_never_overcommit() {
    let h = harness("u1", Credits::whole(3)).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let credits = h.credits.clone();
        handles.push(tokio::spawn(async move {
            credits
                .create_credit_hold("u1", Credits::whole(2), OperationKind::Scrape)
                .await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);

    let held = h.credits.holds().held_amount("u1").await.unwrap();
    assert!(held <= h.ledger.get_balance("u1").await.unwrap());
}

#[tokio::test]
async fn test_provider_failure_charges_nothing() {
    let h = harness("u1", Credits::whole(5)).await;

    let err = h
        .runner
        .run(scrape("u1", "job-1"), Duration::from_secs(5), || async {
            Err::<(), _>(ProviderError::NotFound("no such profile".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OperationError::Provider(_)));

    assert_eq!(h.ledger.get_balance("u1").await.unwrap(), Credits::whole(5));
    assert!(h.ledger.list_transactions("u1", 10).await.unwrap().is_empty());
    assert!(h.credits.holds().current("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_timeout_charges_nothing() {
    let h = harness("u1", Credits::whole(5)).await;

    let err = h
        .runner
        .run(scrape("u1", "job-1"), Duration::from_millis(20), || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OperationError::Timeout { .. }));

    assert_eq!(h.ledger.get_balance("u1").await.unwrap(), Credits::whole(5));
    assert!(h.credits.holds().current("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_success_charges_price_and_records_metadata() {
    let h = harness("u1", Credits::whole(5)).await;

    let request = scrape("u1", "job-1").with_entry("profile_url", "https://www.linkedin.com/in/jane");
    let outcome = h
        .runner
        .run(request, Duration::from_secs(5), || async { Ok("profile") })
        .await
        .unwrap();

    assert_eq!(outcome.result, "profile");
    assert_eq!(outcome.charged, Credits::whole(2));
    assert_eq!(outcome.new_balance, Credits::whole(3));

    let history = h.ledger.list_transactions("u1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, outcome.transaction_id);
    assert_eq!(
        history[0].metadata.get("profile_url").map(String::as_str),
        Some("https://www.linkedin.com/in/jane")
    );
    assert_eq!(h.ledger.replayed_balance("u1").await.unwrap(), Credits::whole(3));
}

#[tokio::test]
async fn test_deduction_retries_transient_write_failures() {
    let h = harness("u1", Credits::whole(5)).await;
    h.ledger.fail_next_writes(2);

    let outcome = h
        .runner
        .run(scrape("u1", "job-1"), Duration::from_secs(5), || async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(outcome.new_balance, Credits::whole(3));
    assert!(h.credits.holds().current("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_retry_after_lost_acknowledgement_charges_once() {
    let h = harness("u1", Credits::whole(5)).await;
    h.ledger.lose_next_acks(1);

    let outcome = h
        .runner
        .run(scrape("u1", "job-1"), Duration::from_secs(5), || async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(outcome.new_balance, Credits::whole(3));
    assert_eq!(h.ledger.get_balance("u1").await.unwrap(), Credits::whole(3));
    assert_eq!(h.ledger.list_transactions("u1", 20).await.unwrap().len(), 1);
    assert!(h.credits.holds().current("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_exhausted_deduction_retries_release_without_charge() {
    let h = harness("u1", Credits::whole(5)).await;
    h.ledger.fail_next_writes(10);

    let err = h
        .runner
        .run(scrape("u1", "job-1"), Duration::from_secs(5), || async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OperationError::Credit(CreditError::LedgerWriteFailed(_))
    ));

    h.ledger.fail_next_writes(0);
    assert_eq!(h.ledger.get_balance("u1").await.unwrap(), Credits::whole(5));
    assert!(h.credits.holds().current("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected_while_in_flight() {
    let h = harness("u1", Credits::whole(5)).await;
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();

    let runner = h.runner.clone();
    let first = tokio::spawn(async move {
        runner
            .run(scrape("u1", "job-1"), Duration::from_secs(5), move || async move {
                let _ = started_tx.send(());
                let _ = finish_rx.await;
                Ok(())
            })
            .await
    });
    started_rx.await.unwrap();

    let err = h
        .runner
        .run(scrape("u1", "job-1"), Duration::from_secs(5), || async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OperationError::Credit(CreditError::DuplicateSubmission(_))
    ));

    finish_tx.send(()).unwrap();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.new_balance, Credits::whole(3));
}

#[tokio::test]
async fn test_second_operation_conflicts_with_outstanding_hold() {
    let h = harness("u1", Credits::whole(10)).await;
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();

    let runner = h.runner.clone();
    let first = tokio::spawn(async move {
        runner
            .run(scrape("u1", "job-1"), Duration::from_secs(5), move || async move {
                let _ = started_tx.send(());
                let _ = finish_rx.await;
                Ok(())
            })
            .await
    });
    started_rx.await.unwrap();

    let err = h
        .runner
        .run(scrape("u1", "job-2"), Duration::from_secs(5), || async { Ok(()) })
        .await
        .unwrap_err();
    match err {
        OperationError::Credit(e) => {
            assert!(matches!(e, CreditError::HoldConflict { .. }));
            assert!(e.is_retryable());
        }
        other => panic!("unexpected error: {other:?}"),
    }

    finish_tx.send(()).unwrap();
    first.await.unwrap().unwrap();
    assert_eq!(h.ledger.get_balance("u1").await.unwrap(), Credits::whole(8));
}

#[tokio::test]
async fn test_abandoned_operation_releases_its_hold() {
    let h = harness("u1", Credits::whole(5)).await;
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

    let runner = h.runner.clone();
    let task = tokio::spawn(async move {
        runner
            .run(scrape("u1", "job-1"), Duration::from_secs(60), move || async move {
                let _ = started_tx.send(());
                std::future::pending::<Result<(), ProviderError>>().await
            })
            .await
    });
    started_rx.await.unwrap();
    assert!(h.credits.holds().current("u1").await.unwrap().is_some());

    task.abort();
    let _ = task.await;

    for _ in 0..50 {
        if h.credits.holds().current("u1").await.unwrap().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.credits.holds().current("u1").await.unwrap().is_none());
    assert_eq!(h.ledger.get_balance("u1").await.unwrap(), Credits::whole(5));
}
