//! Generation workflow integration tests.
//!
//! Drive the coordinator directly against the service's store, the way the
//! adventure backend wraps its generation calls.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::TestHarness;
use futures::future::join_all;
use quest_credits_core::{
    AccountId, AdventurePhase, CreditError, CreditPurpose, RegenerationCounter, RegenerationError,
};
use quest_credits_service::{GenerationError, GenerationFailure, PaidRequest};
use tokio::sync::{oneshot, Barrier};

fn paid(account_id: AccountId) -> PaidRequest {
    PaidRequest {
        account_id,
        purpose: CreditPurpose::AdventureGeneration,
        metadata: serde_json::json!({ "title": "Ashes of Varn" }),
    }
}

async fn bump(
    harness: &TestHarness,
    adventure_id: &quest_credits_core::AdventureId,
    counter: RegenerationCounter,
    times: u32,
) {
    for _ in 0..times {
        harness
            .store
            .increment_regenerations(adventure_id, counter)
            .await
            .unwrap();
    }
}

// ============================================================================
// Paid generations
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_paid_generations_draw_down_balance() {
    let harness = TestHarness::new();
    let account_id = harness.account_with_credits(5).await;
    let coordinator = harness.state.coordinator.clone();

    let attempts = (0..3).map(|_| {
        let coordinator = coordinator.clone();
        async move {
            coordinator
                .run_paid(paid(account_id), || async { Ok::<_, String>("adventure") })
                .await
        }
    });
    let results = join_all(attempts).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(harness.credits(&account_id).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_paid_generations_never_overdraw() {
    let harness = TestHarness::new();
    let account_id = harness.account_with_credits(5).await;
    let coordinator = harness.state.coordinator.clone();
    let calls = Arc::new(AtomicUsize::new(0));

    let attempts = (0..12).map(|_| {
        let coordinator = coordinator.clone();
        let calls = calls.clone();
        async move {
            coordinator
                .run_paid(paid(account_id), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await
        }
    });
    let results = join_all(attempts).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(GenerationError::Credit(CreditError::InsufficientCredits { .. }))
            )
        })
        .count();

    assert_eq!(succeeded, 5);
    assert_eq!(rejected, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(harness.credits(&account_id).await, 0);
}

#[tokio::test]
async fn empty_balance_never_calls_generation() {
    let harness = TestHarness::new();
    let account_id = harness.account_with_credits(0).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();

    let result = harness
        .state
        .coordinator
        .run_paid(paid(account_id), move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await;

    match result {
        Err(GenerationError::Credit(CreditError::InsufficientCredits { purpose, balance })) => {
            assert_eq!(purpose, CreditPurpose::AdventureGeneration);
            assert_eq!(balance, 0);
        }
        other => panic!("expected insufficient credits, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.credits(&account_id).await, 0);
}

#[tokio::test]
async fn failed_generation_is_refunded() {
    let harness = TestHarness::new();
    let account_id = harness.account_with_credits(4).await;

    let result = harness
        .state
        .coordinator
        .run_paid(paid(account_id), || async {
            Err::<(), _>("upstream returned malformed scaffold".to_string())
        })
        .await;

    match result {
        Err(GenerationError::GenerationFailed {
            failure: GenerationFailure::Error(message),
            refunded_balance,
        }) => {
            assert_eq!(message, "upstream returned malformed scaffold");
            assert_eq!(refunded_balance, Some(4));
        }
        other => panic!("expected a refunded failure, got {other:?}"),
    }
    assert_eq!(harness.credits(&account_id).await, 4);
}

#[tokio::test]
async fn successful_generation_keeps_the_charge() {
    let harness = TestHarness::new();
    let account_id = harness.account_with_credits(4).await;

    let generation = harness
        .state
        .coordinator
        .run_paid(paid(account_id), || async { Ok::<_, String>("The Drowned Bell") })
        .await
        .unwrap();

    assert_eq!(generation.output, "The Drowned Bell");
    assert_eq!(generation.balance, 3);
    assert_eq!(harness.credits(&account_id).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_caller_still_refunds() {
    let harness = TestHarness::new();
    let account_id = harness.account_with_credits(2).await;
    let (release, wait) = oneshot::channel::<()>();

    let coordinator = harness.state.coordinator.clone();
    let caller = coordinator.run_paid(paid(account_id), move || async move {
        let _ = wait.await;
        Err::<(), _>("client went away".to_string())
    });

    // The caller gives up while generation is in flight.
    assert!(tokio::time::timeout(Duration::from_millis(50), caller)
        .await
        .is_err());
    assert_eq!(harness.credits(&account_id).await, 1);

    release.send(()).unwrap();

    let mut restored = false;
    for _ in 0..100 {
        if harness.credits(&account_id).await == 2 {
            restored = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(restored, "credit was not refunded after the caller was dropped");
}

// ============================================================================
// Regenerations
// ============================================================================

#[tokio::test]
async fn exhausted_scaffold_allowance_is_rejected() {
    let harness = TestHarness::new();
    let adventure_id = harness.adventure_in(AdventurePhase::Scaffold).await;
    bump(&harness, &adventure_id, RegenerationCounter::Scaffold, 10).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();

    let result = harness
        .state
        .coordinator
        .run_regeneration(adventure_id, move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await;

    match result {
        Err(GenerationError::Regeneration(RegenerationError::LimitExceeded {
            counter,
            used,
            limit,
        })) => {
            assert_eq!(counter, RegenerationCounter::Scaffold);
            assert_eq!(used, 10);
            assert_eq!(limit, 10);
        }
        other => panic!("expected limit exceeded, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn last_movement_regeneration_is_allowed() {
    let harness = TestHarness::new();
    let adventure_id = harness.adventure_in(AdventurePhase::Movements).await;
    bump(&harness, &adventure_id, RegenerationCounter::Movement, 19).await;

    let regeneration = harness
        .state
        .coordinator
        .run_regeneration(adventure_id, || async { Ok::<_, String>("movement 4, take 20") })
        .await
        .unwrap();

    assert_eq!(regeneration.counter, RegenerationCounter::Movement);
    assert_eq!(regeneration.used, 20);
    assert_eq!(regeneration.limit, 20);

    let counts = harness.state.limiter().get_counts(&adventure_id).await.unwrap();
    assert_eq!(counts.movements_remaining, 0);

    let next = harness
        .state
        .coordinator
        .run_regeneration(adventure_id, || async { Ok::<_, String>("take 21") })
        .await;
    assert!(matches!(
        next,
        Err(GenerationError::Regeneration(RegenerationError::LimitExceeded { used: 20, .. }))
    ));
}

#[tokio::test]
async fn failed_regeneration_is_not_counted() {
    let harness = TestHarness::new();
    let adventure_id = harness.adventure_in(AdventurePhase::Scaffold).await;
    bump(&harness, &adventure_id, RegenerationCounter::Scaffold, 9).await;

    let result = harness
        .state
        .coordinator
        .run_regeneration(adventure_id, || async {
            Err::<(), _>("timeout".to_string())
        })
        .await;

    assert!(matches!(
        result,
        Err(GenerationError::GenerationFailed {
            refunded_balance: None,
            ..
        })
    ));
    let counts = harness.state.limiter().get_counts(&adventure_id).await.unwrap();
    assert_eq!(counts.scaffold_used, 9);
    assert_eq!(counts.scaffold_remaining, 1);
}

#[tokio::test]
async fn finalized_adventure_is_closed() {
    let harness = TestHarness::new();
    let adventure_id = harness.adventure_in(AdventurePhase::Finalized).await;

    let result = harness
        .state
        .coordinator
        .run_regeneration(adventure_id, || async { Ok::<_, String>(()) })
        .await;

    assert!(matches!(
        result,
        Err(GenerationError::Regeneration(RegenerationError::PhaseClosed {
            phase: AdventurePhase::Finalized
        }))
    ));
}

#[tokio::test]
async fn counters_are_independent_across_phases() {
    let harness = TestHarness::new();
    let adventure_id = harness.adventure_in(AdventurePhase::Scaffold).await;
    bump(&harness, &adventure_id, RegenerationCounter::Scaffold, 10).await;

    harness
        .store
        .set_phase(&adventure_id, AdventurePhase::Movements)
        .await
        .unwrap();

    let regeneration = harness
        .state
        .coordinator
        .run_regeneration(adventure_id, || async { Ok::<_, String>(()) })
        .await
        .unwrap();

    assert_eq!(regeneration.counter, RegenerationCounter::Movement);
    assert_eq!(regeneration.used, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_regenerations_overshoot_by_at_most_one_each() {
    let harness = TestHarness::new();
    let adventure_id = harness.adventure_in(AdventurePhase::Scaffold).await;
    bump(&harness, &adventure_id, RegenerationCounter::Scaffold, 9).await;

    // Both requests pass the check before either finishes generating.
    let barrier = Arc::new(Barrier::new(2));
    let coordinator = harness.state.coordinator.clone();
    let attempts = (0..2).map(|_| {
        let coordinator = coordinator.clone();
        let barrier = barrier.clone();
        async move {
            coordinator
                .run_regeneration(adventure_id, move || async move {
                    barrier.wait().await;
                    Ok::<_, String>(())
                })
                .await
        }
    });
    let results = join_all(attempts).await;
    assert!(results.iter().all(Result::is_ok));

    let counts = harness.state.limiter().get_counts(&adventure_id).await.unwrap();
    assert_eq!(counts.scaffold_used, 11);
    assert_eq!(counts.scaffold_remaining, 0);

    let next = harness
        .state
        .coordinator
        .run_regeneration(adventure_id, || async { Ok::<_, String>(()) })
        .await;
    assert!(matches!(
        next,
        Err(GenerationError::Regeneration(RegenerationError::LimitExceeded { used: 11, limit: 10, .. }))
    ));
}

// ============================================================================
// Purchases
// ============================================================================

#[tokio::test]
async fn purchase_adds_to_balance_and_lifetime_total() {
    let harness = TestHarness::new();
    let account_id = harness.account_with_credits(0).await;

    let balance = harness.state.ledger().add_credits(&account_id, 10).await.unwrap();

    assert_eq!(balance.credits, 10);
    assert_eq!(balance.total_purchased, 10);
}
