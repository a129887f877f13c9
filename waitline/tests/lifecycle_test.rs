//! Ticket lifecycle integration tests on the in-memory store.
//!
//! Run with: `cargo test --test lifecycle_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;

use common::{Harness, cash_request};
use waitline::collaborators::NotificationSink;
use waitline::engine::{BookingRequest, EngineError};
use waitline::register::QUEUE_CLOSED_REASON;
use waitline::store::TicketStore;
use waitline_core::DomainError;
use waitline_core::events::{NotificationKind, QueueEvent};
use waitline_core::types::{
    BookingReference, CancellationActor, PaymentStatus, QueueStatus, TicketNumber, TicketStatus,
};

#[tokio::test]
async fn cash_booking_joins_the_line_immediately() {
    let h = Harness::new();
    let queue = h.open_queue().await;

    let outcome = h.book_cash(&queue).await;

    assert!(!outcome.replayed);
    assert!(outcome.checkout.is_none());
    assert_eq!(outcome.ticket.status, TicketStatus::Waiting);
    assert_eq!(outcome.ticket.payment_status, PaymentStatus::Unpaid);
    assert_eq!(outcome.ticket.number, TicketNumber::new(1));
    assert!(outcome.ticket.estimated_wait_minutes.is_some());
}

#[tokio::test]
async fn online_booking_waits_for_payment_outside_the_line() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    h.book_cash(&queue).await;

    let outcome = h.book_online(&queue, 2500).await;

    assert_eq!(outcome.ticket.status, TicketStatus::PendingPayment);
    let checkout = outcome.checkout.expect("checkout session created");
    assert!(checkout.url.contains(&checkout.session_id));

    let snapshot = h
        .state
        .engine
        .queue_snapshot(queue.business_id)
        .await
        .unwrap();
    assert_eq!(snapshot.waiting.len(), 1);
    assert_eq!(snapshot.pending_payment, 1);
}

#[tokio::test]
async fn free_online_booking_skips_payment() {
    let h = Harness::new();
    let queue = h.open_queue().await;

    let outcome = h.book_online(&queue, 0).await;

    assert_eq!(outcome.ticket.status, TicketStatus::Waiting);
    assert!(outcome.checkout.is_none());
}

#[tokio::test]
async fn numbers_are_sequential_per_queue() {
    let h = Harness::new();
    let queue = h.open_queue().await;

    let mut numbers = Vec::new();
    for _ in 0..5 {
        numbers.push(h.book_cash(&queue).await.ticket.number.get());
    }

    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn replayed_reference_returns_the_same_ticket_without_quota() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let request = BookingRequest {
        booking_reference: Some(BookingReference::new("client-retry-1")),
        ..cash_request(&queue)
    };

    let first = h.state.engine.book(request.clone()).await.unwrap();
    let second = h.state.engine.book(request).await.unwrap();

    assert!(second.replayed);
    assert_eq!(first.ticket.id, second.ticket.id);
    let decision = h.state.admission.check(queue.business_id).await.unwrap();
    assert_eq!(decision.count, 1);
}

#[tokio::test]
async fn paused_queue_refuses_bookings_until_resumed() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    h.state.register.pause(queue.id).await.unwrap();

    let err = h.state.engine.book(cash_request(&queue)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Domain(DomainError::QueueNotAcceptingTickets {
            status: QueueStatus::Paused,
            ..
        })
    ));

    h.state.register.resume(queue.id).await.unwrap();
    let outcome = h.book_cash(&queue).await;
    assert_eq!(outcome.ticket.number, TicketNumber::new(1));
}

#[tokio::test]
async fn call_next_takes_the_lowest_number_and_pages_the_holder() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let first = h.book_cash(&queue).await.ticket;
    h.book_cash(&queue).await;

    let customer = first.customer_id.unwrap();
    let mut personal = h
        .state
        .broadcaster
        .subscribe(&format!("user:{customer}"))
        .await;

    let called = h.state.engine.call_next(queue.id).await.unwrap().unwrap();

    assert_eq!(called.id, first.id);
    assert_eq!(called.status, TicketStatus::Called);
    assert!(called.called_at.is_some());

    let delivered = personal.try_recv().expect("personal event delivered");
    assert!(matches!(
        delivered.event.as_ref(),
        QueueEvent::YourTicketCalled { number, .. } if *number == TicketNumber::new(1)
    ));

    h.state.engine.runner().wait_idle().await;
    let notifications = h.state.notifications.list(customer).await;
    assert!(notifications.iter().any(|n| n.kind == NotificationKind::Turn));
}

#[tokio::test]
async fn call_next_on_an_empty_queue_returns_none() {
    let h = Harness::new();
    let queue = h.open_queue().await;

    assert!(h.state.engine.call_next(queue.id).await.unwrap().is_none());
}

#[tokio::test]
async fn rejected_transition_leaves_the_ticket_unchanged() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_cash(&queue).await.ticket;

    let err = h.state.engine.complete(ticket.id).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::InvalidTicketTransition { .. })
    ));
    let stored = h.state.engine.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Waiting);
    assert!(stored.completed_at.is_none());
}

#[tokio::test]
async fn full_service_cycle_frees_the_slot() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_cash(&queue).await.ticket;

    h.state.engine.call(ticket.id).await.unwrap();
    h.state.engine.serve(ticket.id).await.unwrap();
    h.clock.advance(chrono::Duration::minutes(9));
    let done = h.state.engine.complete(ticket.id).await.unwrap();

    assert_eq!(done.status, TicketStatus::Completed);
    assert_eq!(done.service_duration_minutes(), Some(9.0));
    let queue = h.state.register.get(queue.id).await.unwrap();
    assert_eq!(queue.current_count, 0);
}

#[tokio::test]
async fn reactivated_ticket_is_called_in_numeric_order() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let one = h.book_cash(&queue).await.ticket;
    let two = h.book_cash(&queue).await.ticket;
    let three = h.book_cash(&queue).await.ticket;
    let engine = &h.state.engine;

    assert_eq!(engine.call_next(queue.id).await.unwrap().unwrap().id, one.id);
    engine.mark_missed(one.id).await.unwrap();
    assert_eq!(engine.call_next(queue.id).await.unwrap().unwrap().id, two.id);

    let back = engine.reactivate(one.id).await.unwrap();
    assert_eq!(back.status, TicketStatus::Waiting);
    assert_eq!(back.number, TicketNumber::new(1));

    assert_eq!(engine.call_next(queue.id).await.unwrap().unwrap().id, one.id);
    assert_eq!(engine.call_next(queue.id).await.unwrap().unwrap().id, three.id);
}

#[tokio::test]
async fn customer_cancellation_records_actor_and_reason() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_cash(&queue).await.ticket;
    let customer = ticket.customer_id.unwrap();

    let cancelled = h
        .state
        .engine
        .cancel(
            ticket.id,
            CancellationActor::Customer(customer),
            Some("running late".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(cancelled.status, TicketStatus::Cancelled);
    let cancellation = cancelled.cancellation.unwrap();
    assert_eq!(cancellation.actor, CancellationActor::Customer(customer));
    assert_eq!(cancellation.reason.as_deref(), Some("running late"));
}

#[tokio::test]
async fn closing_the_queue_cancels_open_tickets() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let waiting = h.book_cash(&queue).await.ticket;
    let pending = h.book_online(&queue, 1500).await.ticket;
    let served = h.book_cash(&queue).await.ticket;
    h.state.engine.call(served.id).await.unwrap();
    h.state.engine.serve(served.id).await.unwrap();
    h.state.engine.complete(served.id).await.unwrap();

    let closed = h.state.register.close(queue.id).await.unwrap();
    assert_eq!(closed.status, QueueStatus::Closed);

    for id in [waiting.id, pending.id] {
        let ticket = h.state.engine.get_ticket(id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Cancelled);
        let cancellation = ticket.cancellation.unwrap();
        assert_eq!(cancellation.actor, CancellationActor::System);
        assert_eq!(cancellation.reason.as_deref(), Some(QUEUE_CLOSED_REASON));
    }
    let completed = h.state.engine.get_ticket(served.id).await.unwrap();
    assert_eq!(completed.status, TicketStatus::Completed);

    let err = h.state.engine.book(cash_request(&queue)).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound("queue")));

    let snapshot = h
        .state
        .engine
        .queue_snapshot(queue.business_id)
        .await
        .unwrap();
    assert_eq!(snapshot.status, "not_started");
    assert!(snapshot.queue.is_none());
}

#[tokio::test]
async fn failed_insert_hands_back_slot_and_admission() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    h.book_cash(&queue).await;

    h.store.fail_ticket_inserts(true);
    assert!(h.state.engine.book(cash_request(&queue)).await.is_err());
    h.store.fail_ticket_inserts(false);

    let decision = h.state.admission.check(queue.business_id).await.unwrap();
    assert_eq!(decision.count, 1);
    let stored = h.state.register.get(queue.id).await.unwrap();
    assert_eq!(stored.current_count, 1);

    // The burned number leaves a gap
    let next = h.book_cash(&queue).await.ticket;
    assert_eq!(next.number, TicketNumber::new(3));
}

#[tokio::test]
async fn removing_a_ticket_deletes_it() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_cash(&queue).await.ticket;

    h.state.engine.remove(ticket.id).await.unwrap();

    assert!(matches!(
        h.state.engine.get_ticket(ticket.id).await,
        Err(EngineError::NotFound("ticket"))
    ));
    let stored = h.state.register.get(queue.id).await.unwrap();
    assert_eq!(stored.current_count, 0);
}

#[tokio::test]
async fn opening_twice_returns_the_same_queue() {
    let h = Harness::new();
    let queue = h.open_queue().await;

    let again = h.state.register.open(queue.business_id, Some(10)).await.unwrap();

    assert_eq!(again.id, queue.id);
}

#[tokio::test]
async fn opening_a_queue_is_announced_to_the_business() {
    let h = Harness::new();
    let business_id = waitline_core::types::BusinessId::new();
    let mut room = h
        .state
        .broadcaster
        .subscribe(&format!("business:{business_id}"))
        .await;

    let queue = h.state.register.open(business_id, None).await.unwrap();

    let delivered = room.try_recv().unwrap();
    let QueueEvent::QueueUpdated { queue: announced, positions } = delivered.event.as_ref() else {
        panic!("expected queueUpdated, got {}", delivered.event.name());
    };
    assert_eq!(announced.id, queue.id);
    assert_eq!(announced.status, QueueStatus::Active);
    assert!(positions.is_empty());

    h.state.register.open(business_id, None).await.unwrap();
    assert!(room.try_recv().is_err());
}

#[tokio::test]
async fn booking_that_lands_after_close_is_cancelled() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    h.store.close_queue_before_next_insert(queue.id).await;

    let err = h.state.engine.book(cash_request(&queue)).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::QueueNotAcceptingTickets {
            status: QueueStatus::Closed,
            ..
        })
    ));
    let stored = h.state.register.get(queue.id).await.unwrap();
    assert_eq!(stored.current_count, 0);
    let store = h.state.engine.store();
    assert!(store.queue_tickets(queue.id, &[TicketStatus::Waiting]).await.unwrap().is_empty());
    let cancelled = store
        .queue_tickets(queue.id, &[TicketStatus::Cancelled])
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    let cancellation = cancelled[0].cancellation.clone().unwrap();
    assert_eq!(cancellation.actor, CancellationActor::System);
    assert_eq!(cancellation.reason.as_deref(), Some(QUEUE_CLOSED_REASON));
}
