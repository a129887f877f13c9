//! Payment reconciliation against the mock gateway.
//!
//! Run with: `cargo test --test reconciliation_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;

use common::Harness;
use waitline::engine::EngineError;
use waitline::payment_gateway::MockPaymentGateway;
use waitline::reconciler::{Settlement, WebhookOutcome};
use waitline_core::DomainError;
use waitline_core::environment::Clock;
use waitline::store::PaymentStore;
use waitline_core::types::{
    BookingReference, CancellationActor, Money, PaymentId, PaymentRecord, PaymentRecordStatus,
    PaymentStatus, TicketStatus,
};

/// Signed `checkout.session.completed` body and header
fn signed_completion(
    h: &Harness,
    reference: &BookingReference,
    transaction_id: &str,
    cents: u64,
) -> (String, String) {
    let payload = MockPaymentGateway::checkout_completed_payload(
        reference,
        transaction_id,
        Money::from_cents(cents),
    );
    let signature = h
        .gateway
        .sign(payload.as_bytes(), h.clock.now().timestamp())
        .unwrap();
    (payload, signature)
}

fn settlement(outcome: WebhookOutcome) -> Settlement {
    match outcome {
        WebhookOutcome::Settled(settlement) => settlement,
        WebhookOutcome::Ignored(kind) => panic!("event ignored: {kind}"),
    }
}

#[tokio::test]
async fn signed_webhook_moves_the_ticket_into_the_line() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    let mut room = h
        .state
        .broadcaster
        .subscribe(&format!("business:{}", queue.business_id))
        .await;

    let (payload, signature) = signed_completion(&h, &ticket.booking_reference, "pi_1", 2500);
    let outcome = h
        .state
        .reconciler
        .handle_webhook(payload.as_bytes(), &signature)
        .await
        .unwrap();

    let Settlement::Settled(settled) = settlement(outcome) else {
        panic!("expected a fresh settlement");
    };
    assert_eq!(settled.status, TicketStatus::Waiting);
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
    assert_eq!(h.store.payment_count().await, 1);

    let delivered = room.try_recv().expect("ticket broadcast");
    assert_eq!(delivered.event.name(), "ticketCreated");

    h.state.engine.runner().wait_idle().await;
    assert!(h.mailer.sent().iter().any(|m| m.subject == "Payment receipt"));
}

#[tokio::test]
async fn redelivered_webhook_is_a_no_op() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    let (payload, signature) = signed_completion(&h, &ticket.booking_reference, "pi_1", 2500);

    h.state
        .reconciler
        .handle_webhook(payload.as_bytes(), &signature)
        .await
        .unwrap();
    let again = h
        .state
        .reconciler
        .handle_webhook(payload.as_bytes(), &signature)
        .await
        .unwrap();

    assert!(matches!(settlement(again), Settlement::AlreadyPaid(_)));
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn reused_transaction_id_is_not_recorded_twice() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let first = h.book_online(&queue, 1000).await.ticket;
    let second = h.book_online(&queue, 1000).await.ticket;

    h.state
        .reconciler
        .settle(&first.booking_reference, "pi_same", Money::from_cents(1000))
        .await
        .unwrap();
    let outcome = h
        .state
        .reconciler
        .settle(&second.booking_reference, "pi_same", Money::from_cents(1000))
        .await
        .unwrap();

    assert!(matches!(outcome, Settlement::Duplicate(_)));
    let untouched = h.state.engine.get_ticket(second.id).await.unwrap();
    assert_eq!(untouched.status, TicketStatus::PendingPayment);
    assert_eq!(untouched.payment_status, PaymentStatus::Unpaid);
}

#[tokio::test]
async fn bad_signature_mutates_nothing() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    let (payload, _) = signed_completion(&h, &ticket.booking_reference, "pi_1", 2500);
    let forged = MockPaymentGateway::new("whsec_other", 300)
        .sign(payload.as_bytes(), h.clock.now().timestamp())
        .unwrap();

    let err = h
        .state
        .reconciler
        .handle_webhook(payload.as_bytes(), &forged)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::GatewayVerificationFailed(_))
    ));
    let stored = h.state.engine.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::PendingPayment);
    assert_eq!(h.store.payment_count().await, 0);
}

#[tokio::test]
async fn stale_signature_is_rejected() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    let (payload, signature) = signed_completion(&h, &ticket.booking_reference, "pi_1", 2500);

    h.clock.advance(chrono::Duration::minutes(10));
    let err = h
        .state
        .reconciler
        .handle_webhook(payload.as_bytes(), &signature)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::GatewayVerificationFailed(_))
    ));
}

#[tokio::test]
async fn unknown_reference_records_nothing() {
    let h = Harness::new();
    let (payload, signature) =
        signed_completion(&h, &BookingReference::new("never-booked"), "pi_9", 500);

    let err = h
        .state
        .reconciler
        .handle_webhook(payload.as_bytes(), &signature)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NotFound("ticket")));
    assert_eq!(h.store.payment_count().await, 0);
}

#[tokio::test]
async fn unrelated_events_are_ignored() {
    let h = Harness::new();
    let payload = r#"{"id":"evt_1","type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
    let signature = h
        .gateway
        .sign(payload.as_bytes(), h.clock.now().timestamp())
        .unwrap();

    let outcome = h
        .state
        .reconciler
        .handle_webhook(payload.as_bytes(), &signature)
        .await
        .unwrap();

    assert!(matches!(outcome, WebhookOutcome::Ignored(kind) if kind == "customer.created"));
}

#[tokio::test]
async fn returning_customer_confirms_the_session() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let outcome = h.book_online(&queue, 4000).await;
    let session_id = outcome.checkout.unwrap().session_id;

    let unpaid = h
        .state
        .reconciler
        .confirm_session(&session_id)
        .await
        .unwrap_err();
    assert!(matches!(
        unpaid,
        EngineError::Domain(DomainError::InvalidBooking(_))
    ));

    h.gateway.complete_session(&session_id).unwrap();
    let settled = h.state.reconciler.confirm_session(&session_id).await.unwrap();

    assert!(matches!(settled, Settlement::Settled(_)));
    assert_eq!(settled.ticket().status, TicketStatus::Waiting);
    assert_eq!(settled.ticket().id, outcome.ticket.id);
}

#[tokio::test]
async fn cancelled_paid_ticket_is_refunded() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    h.state
        .reconciler
        .settle(&ticket.booking_reference, "pi_refund", Money::from_cents(2500))
        .await
        .unwrap();
    h.state
        .engine
        .cancel(ticket.id, CancellationActor::Staff, None)
        .await
        .unwrap();

    let refunded = h.state.reconciler.refund(ticket.id).await.unwrap();

    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(h.gateway.refunded(), vec!["pi_refund".to_string()]);

    let again = h.state.reconciler.refund(ticket.id).await.unwrap_err();
    assert!(matches!(
        again,
        EngineError::Domain(DomainError::NotRefundable(_))
    ));
}

#[tokio::test]
async fn active_ticket_is_not_refundable() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    h.state
        .reconciler
        .settle(&ticket.booking_reference, "pi_live", Money::from_cents(2500))
        .await
        .unwrap();

    let err = h.state.reconciler.refund(ticket.id).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::NotRefundable(_))
    ));
    assert!(h.gateway.refunded().is_empty());
}

#[tokio::test]
async fn payment_after_cancellation_leaves_the_ticket_refundable() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    h.state
        .engine
        .cancel(ticket.id, CancellationActor::Staff, None)
        .await
        .unwrap();

    let outcome = h
        .state
        .reconciler
        .settle(&ticket.booking_reference, "pi_late", Money::from_cents(2500))
        .await
        .unwrap();

    assert_eq!(outcome.ticket().status, TicketStatus::Cancelled);
    assert_eq!(outcome.ticket().payment_status, PaymentStatus::Paid);
    assert!(h.state.reconciler.refund(ticket.id).await.is_ok());
}

#[tokio::test]
async fn redelivery_finishes_a_settlement_that_stopped_after_recording() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    // First delivery recorded the payment but never reached the ticket
    h.store
        .insert_payment(&PaymentRecord {
            id: PaymentId::new(),
            ticket_id: ticket.id,
            business_id: ticket.business_id,
            payer: ticket.customer_id,
            amount: Money::from_cents(2500),
            transaction_id: "pi_1".to_string(),
            status: PaymentRecordStatus::Completed,
            created_at: h.clock.now(),
        })
        .await
        .unwrap();

    let (payload, signature) = signed_completion(&h, &ticket.booking_reference, "pi_1", 2500);
    let outcome = h
        .state
        .reconciler
        .handle_webhook(payload.as_bytes(), &signature)
        .await
        .unwrap();

    assert!(matches!(settlement(outcome), Settlement::Settled(_)));
    let after = h.state.engine.get_ticket(ticket.id).await.unwrap();
    assert_eq!(after.status, TicketStatus::Waiting);
    assert_eq!(after.payment_status, PaymentStatus::Paid);
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_deliveries_settle_once() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 2500).await.ticket;
    let mut room = h
        .state
        .broadcaster
        .subscribe(&format!("business:{}", queue.business_id))
        .await;
    let (payload, signature) = signed_completion(&h, &ticket.booking_reference, "pi_twice", 2500);

    let deliveries = (0..8).map(|_| {
        let reconciler = h.state.reconciler.clone();
        let payload = payload.clone();
        let signature = signature.clone();
        tokio::spawn(async move {
            reconciler
                .handle_webhook(payload.as_bytes(), &signature)
                .await
        })
    });
    let outcomes = futures::future::join_all(deliveries).await;

    for outcome in outcomes {
        assert!(outcome.unwrap().is_ok());
    }
    assert_eq!(h.store.payment_count().await, 1);
    let after = h.state.engine.get_ticket(ticket.id).await.unwrap();
    assert_eq!(after.status, TicketStatus::Waiting);
    assert_eq!(after.payment_status, PaymentStatus::Paid);

    let mut created = 0;
    while let Ok(delivered) = room.try_recv() {
        if delivered.event.name() == "ticketCreated" {
            created += 1;
        }
    }
    assert_eq!(created, 1);
}
