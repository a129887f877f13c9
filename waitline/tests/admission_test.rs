//! Monthly admission quota.
//!
//! Run with: `cargo test --test admission_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{Harness, cash_request};
use tokio_test::assert_ok;
use waitline::engine::EngineError;
use waitline_core::DomainError;
use waitline_core::subscription::PlanTier;

#[tokio::test]
async fn basic_plan_stops_at_fifty_and_resets_next_month() {
    let h = Harness::starting_at(Utc.with_ymd_and_hms(2025, 6, 30, 22, 0, 0).unwrap());
    let queue = h.open_queue().await;

    for _ in 0..50 {
        assert_ok!(h.state.engine.book(cash_request(&queue)).await);
    }

    let err = h.state.engine.book(cash_request(&queue)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Domain(DomainError::AdmissionDenied { count: 50, limit: 50 })
    ));

    h.clock.advance(Duration::hours(3));
    let outcome = assert_ok!(h.state.engine.book(cash_request(&queue)).await);
    assert_eq!(outcome.ticket.number.get(), 51);

    let decision = h.state.admission.check(queue.business_id).await.unwrap();
    assert_eq!(decision.count, 1);
    assert_eq!(decision.remaining, 49);
}

#[tokio::test]
async fn check_does_not_consume() {
    let h = Harness::new();
    let queue = h.open_queue().await;

    for _ in 0..3 {
        let decision = h.state.admission.check(queue.business_id).await.unwrap();
        assert!(decision.granted);
        assert_eq!(decision.count, 0);
    }
}

#[tokio::test]
async fn check_reports_rollover_before_it_is_written() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    h.book_cash(&queue).await;
    h.book_cash(&queue).await;

    h.clock.advance(Duration::days(31));

    let decision = h.state.admission.check(queue.business_id).await.unwrap();
    assert_eq!(decision.count, 0);
}

#[tokio::test]
async fn upgrading_keeps_the_month_count() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    for _ in 0..50 {
        h.book_cash(&queue).await;
    }
    assert!(h.state.engine.book(cash_request(&queue)).await.is_err());

    let subscription = h
        .state
        .admission
        .set_plan(queue.business_id, PlanTier::Pro)
        .await
        .unwrap();
    assert_eq!(subscription.monthly_booking_count, 50);

    assert_ok!(h.state.engine.book(cash_request(&queue)).await);
    let decision = h.state.admission.check(queue.business_id).await.unwrap();
    assert_eq!(decision.count, 51);
    assert_eq!(decision.limit, 500);
}

#[tokio::test]
async fn refused_bookings_do_not_count() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    h.state.register.pause(queue.id).await.unwrap();

    assert!(h.state.engine.book(cash_request(&queue)).await.is_err());

    let decision = h.state.admission.check(queue.business_id).await.unwrap();
    assert_eq!(decision.count, 0);
}

#[tokio::test]
async fn record_counts_one_admission() {
    let h = Harness::new();
    let queue = h.open_queue_on(PlanTier::Enterprise).await;

    let decision = h.state.admission.record(queue.business_id).await.unwrap();

    assert_eq!(decision.count, 1);
    assert_eq!(decision.limit, 2000);
    assert_eq!(decision.remaining, 1999);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn enterprise_plan_denies_the_two_thousand_and_first_booking() {
    let h = Harness::new();
    let queue = h.open_queue_on(PlanTier::Enterprise).await;
    for _ in 0..1999 {
        assert_ok!(h.state.admission.record(queue.business_id).await);
    }

    // Ten bookings race for the last admission of the month
    let bookings = (0..10).map(|_| {
        let engine = h.state.engine.clone();
        let request = cash_request(&queue);
        tokio::spawn(async move { engine.book(request).await })
    });
    let results: Vec<_> = futures::future::join_all(bookings)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert!(matches!(
            err,
            EngineError::Domain(DomainError::AdmissionDenied { count: 2000, limit: 2000 })
        ));
    }

    let decision = h.state.admission.check(queue.business_id).await.unwrap();
    assert!(!decision.granted);
    assert_eq!(decision.count, 2000);
    assert_eq!(decision.remaining, 0);
}
