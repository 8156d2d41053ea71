#![cfg(feature = "async")]

use bulwark::{Bulkhead, CancelToken, CircuitBreaker, Guard, GuardError, ManualClock, State};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
struct Unavailable;

#[tokio::test]
async fn test_async_breaker_trips_and_rejects() {
    let breaker = CircuitBreaker::builder("payment")
        .failure_threshold(2)
        .build()
        .unwrap();

    for _ in 0..3 {
        let result = breaker
            .call_async(|| async { Result::<String, Unavailable>::Ok("paid".to_string()) })
            .await;
        assert!(result.is_ok());
    }

    for _ in 0..2 {
        let result = breaker
            .call_async(|| async { Result::<String, _>::Err(Unavailable) })
            .await;
        assert!(matches!(result, Err(GuardError::Operation(Unavailable))));
    }
    assert_eq!(breaker.current_state(), State::Open);

    let result = breaker
        .call_async(|| async { Result::<String, Unavailable>::Ok("paid".to_string()) })
        .await;
    assert!(matches!(result, Err(GuardError::CircuitOpen)));
}

#[tokio::test]
async fn test_dropped_future_releases_bulkhead_slot() {
    let bulkhead = Bulkhead::new("payment", 1).unwrap();
    let entered = Arc::new(Notify::new());

    let task = {
        let bulkhead = bulkhead.clone();
        let entered = Arc::clone(&entered);
        tokio::spawn(async move {
            bulkhead
                .try_execute_async(|| async move {
                    entered.notify_one();
                    std::future::pending::<Result<(), Unavailable>>().await
                })
                .await
        })
    };

    entered.notified().await;
    assert_eq!(bulkhead.active_count(), 1);
    let shed = bulkhead
        .try_execute_async(|| async { Ok::<_, Unavailable>(()) })
        .await;
    assert!(matches!(shed, Err(GuardError::BulkheadFull)));

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(bulkhead.active_count(), 0);
}

#[test]
fn test_dropped_trial_future_frees_half_open_slot() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder("payment")
        .failure_threshold(1)
        .clock(clock.clone())
        .build()
        .unwrap();

    let _ = tokio_test::block_on(breaker.call_async(|| async { Err::<(), _>(Unavailable) }));
    clock.advance(Duration::from_secs(31));

    // Poll the trial once, then drop it mid-flight.
    let mut trial = tokio_test::task::spawn(
        breaker.call_async(|| std::future::pending::<Result<(), Unavailable>>()),
    );
    assert!(trial.poll().is_pending());
    assert_eq!(breaker.current_state(), State::HalfOpen);
    drop(trial);

    let result = tokio_test::block_on(breaker.call_async(|| async { Ok::<_, Unavailable>(()) }));
    assert!(result.is_ok());
    assert_eq!(breaker.current_state(), State::Closed);
}

#[tokio::test]
async fn test_async_guard_honors_cancellation() {
    let guard = Guard::builder("payment").capacity(2).build().unwrap();
    let token = CancelToken::new();

    let ok = guard
        .call_async(&token, || async { Ok::<_, Unavailable>(7) })
        .await;
    assert_eq!(ok.unwrap(), 7);

    token.cancel();
    let refused = guard
        .call_async(&token, || async { Ok::<_, Unavailable>(7) })
        .await;
    assert!(matches!(refused, Err(GuardError::Cancelled)));
    assert_eq!(guard.breaker().current_state(), State::Closed);
    assert_eq!(guard.bulkhead().cancellations_total(), 1);
}
