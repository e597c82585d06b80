//! Racing deliveries against one transaction
//!
//! Runs on the multi-threaded runtime so claims really contend.

mod common;

use common::{Harness, SALT};
use payment_integrity_backend::database::repository::PaymentStore;
use payment_integrity_backend::payments::audit::{signed_response, CountingEntitlementService};
use payment_integrity_backend::payments::error::PaymentError;
use payment_integrity_backend::payments::processor::ProcessOutcome;
use payment_integrity_backend::payments::types::{NotificationSource, PaymentOutcome, TransactionState};
use std::sync::Arc;
use std::time::Duration;

fn slow_harness() -> Arc<Harness> {
    Arc::new(Harness::with(
        CountingEntitlementService::slow(Duration::from_millis(20)),
        common::fast_retry(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_apply_once() {
    let harness = slow_harness();
    let request = harness.issue("499.00").await;
    let message = signed_response(&request, "success", "499.00", SALT);

    let mut handles = Vec::new();
    for i in 0..16 {
        let harness = harness.clone();
        let message = message.clone();
        let source = if i % 2 == 0 {
            NotificationSource::Webhook
        } else {
            NotificationSource::Redirect
        };
        handles.push(tokio::spawn(async move {
            harness.processor.process(&message, source).await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(ProcessOutcome::Applied { .. }) => applied += 1,
            Ok(ProcessOutcome::Duplicate) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(harness.entitlements.applied_count(), 1);
    assert_eq!(harness.entitlements.attempts(), 1);

    let stored = harness
        .store
        .load_transaction(request.txn_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, TransactionState::Success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conflicting_terminal_statuses_settle_on_one() {
    for _ in 0..10 {
        let harness = slow_harness();
        let request = harness.issue("499.00").await;
        let success = signed_response(&request, "success", "499.00", SALT);
        let failure = signed_response(&request, "failure", "499.00", SALT);

        let a = {
            let harness = harness.clone();
            tokio::spawn(async move {
                harness
                    .processor
                    .process(&success, NotificationSource::Webhook)
                    .await
            })
        };
        let b = {
            let harness = harness.clone();
            tokio::spawn(async move {
                harness
                    .processor
                    .process(&failure, NotificationSource::Redirect)
                    .await
            })
        };

        let mut winners = Vec::new();
        for result in [a.await.unwrap(), b.await.unwrap()] {
            match result {
                Ok(ProcessOutcome::Applied { to, .. }) => winners.push(to),
                Ok(ProcessOutcome::Duplicate)
                | Err(PaymentError::UnknownOrClosedTransaction { .. }) => {}
                other => panic!("unexpected result: {:?}", other),
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = harness
            .store
            .load_transaction(request.txn_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, winners[0]);

        let expected = PaymentOutcome::for_state(winners[0]).unwrap();
        assert_eq!(
            harness.entitlements.applied(),
            vec![("sub_77".to_string(), expected)]
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_get_distinct_ids() {
    let harness = Arc::new(Harness::new());

    let mut handles = Vec::new();
    for _ in 0..50 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            harness.issue("10.00").await.txn_id().to_string()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), 50);
    assert_eq!(harness.store.transaction_count().await, 50);
}
