//! Reducer behaviour through the Given-When-Then harness.
//!
//! Run with: `cargo test --test reducer_test`

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use std::sync::Arc;
use waitline_core::DomainError;
use waitline_core::events::{NotificationKind, Room};
use waitline_core::queue::{QueueAction, QueueEnvironment, QueueReducer};
use waitline_core::reducer::Reducer;
use waitline_core::ticket::{TicketAction, TicketEnvironment, TicketReducer};
use waitline_core::types::{
    CancellationActor, PaymentStatus, QueueStatus, Ticket, TicketStatus,
};
use waitline_testing::assertions::{
    assert_effects_count, assert_no_effects, assert_no_publish_to, assert_notifies,
    assert_publishes, assert_sends_email,
};
use waitline_testing::{ReducerTest, helpers, properties, test_clock};

fn ticket_env() -> TicketEnvironment {
    TicketEnvironment::new(Arc::new(test_clock()))
}

fn queue_env() -> QueueEnvironment {
    QueueEnvironment::new(Arc::new(test_clock()))
}

/// A stored ticket in `status`, booked for cash
fn ticket_in(status: TicketStatus) -> Ticket {
    let queue = helpers::open_queue();
    let mut state = None;
    TicketReducer::new()
        .reduce(
            &mut state,
            TicketAction::Book(helpers::cash_booking(&queue, 7)),
            &ticket_env(),
        )
        .unwrap();
    let mut ticket = state.unwrap();
    ticket.status = status;
    ticket
}

#[test]
fn cash_booking_is_announced_to_the_business() {
    let queue = helpers::open_queue();
    let business = Room::Business(queue.business_id);

    ReducerTest::new(TicketReducer::new())
        .with_env(ticket_env())
        .given_state(None)
        .when_action(TicketAction::Book(helpers::cash_booking(&queue, 1)))
        .then_state(|ticket: &Option<Ticket>| {
            let ticket = ticket.as_ref().unwrap();
            assert_eq!(ticket.status, TicketStatus::Waiting);
            assert_eq!(ticket.number.get(), 1);
        })
        .then_effects(move |effects| {
            assert_publishes(effects, &business, "ticketCreated");
            assert_notifies(effects, NotificationKind::Ticket);
        })
        .run();
}

#[test]
fn paid_online_booking_stays_quiet_until_settled() {
    let queue = helpers::open_queue();

    ReducerTest::new(TicketReducer::new())
        .with_env(ticket_env())
        .given_state(None)
        .when_action(TicketAction::Book(helpers::online_booking(&queue, 1, 2500)))
        .then_state(|ticket: &Option<Ticket>| {
            assert_eq!(ticket.as_ref().unwrap().status, TicketStatus::PendingPayment);
        })
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn call_pages_the_holder() {
    let ticket = ticket_in(TicketStatus::Waiting);
    let personal = Room::Customer(ticket.customer_id.unwrap());
    let business = Room::Business(ticket.business_id);

    ReducerTest::new(TicketReducer::new())
        .with_env(ticket_env())
        .given_state(Some(ticket))
        .when_action(TicketAction::Call)
        .then_state(|ticket: &Option<Ticket>| {
            let ticket = ticket.as_ref().unwrap();
            assert_eq!(ticket.status, TicketStatus::Called);
            assert!(ticket.called_at.is_some());
        })
        .then_effects(move |effects| {
            assert_publishes(effects, &business, "ticketCalled");
            assert_publishes(effects, &personal, "yourTicketCalled");
            assert_notifies(effects, NotificationKind::Turn);
            assert_sends_email(effects);
        })
        .run();
}

#[test]
fn walk_in_call_has_no_personal_delivery() {
    let mut ticket = ticket_in(TicketStatus::Waiting);
    ticket.customer_id = None;

    ReducerTest::new(TicketReducer::new())
        .with_env(ticket_env())
        .given_state(Some(ticket))
        .when_action(TicketAction::Call)
        .then_effects(|effects| assert_effects_count(effects, 2))
        .run();
}

#[test]
fn holder_cancelling_gets_no_notification() {
    let ticket = ticket_in(TicketStatus::Waiting);
    let holder = ticket.customer_id.unwrap();
    let personal = Room::Customer(holder);

    ReducerTest::new(TicketReducer::new())
        .with_env(ticket_env())
        .given_state(Some(ticket))
        .when_action(TicketAction::Cancel {
            actor: CancellationActor::Customer(holder),
            reason: None,
        })
        .then_state(|ticket: &Option<Ticket>| {
            let ticket = ticket.as_ref().unwrap();
            assert_eq!(ticket.status, TicketStatus::Cancelled);
            assert!(ticket.cancellation.is_some());
        })
        .then_effects(move |effects| {
            assert_effects_count(effects, 1);
            assert_no_publish_to(effects, &personal);
        })
        .run();
}

#[test]
fn confirming_payment_twice_is_a_no_op() {
    let mut ticket = ticket_in(TicketStatus::Waiting);
    ticket.payment_status = PaymentStatus::Paid;

    ReducerTest::new(TicketReducer::new())
        .with_env(ticket_env())
        .given_state(Some(ticket))
        .when_action(TicketAction::ConfirmPayment)
        .then_state_unchanged()
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn completed_ticket_cannot_be_called() {
    ReducerTest::new(TicketReducer::new())
        .with_env(ticket_env())
        .given_state(Some(ticket_in(TicketStatus::Completed)))
        .when_action(TicketAction::Call)
        .then_error(|e| {
            assert!(matches!(e, DomainError::InvalidTicketTransition { .. }));
        })
        .run();
}

#[test]
fn pausing_twice_is_rejected() {
    let mut queue = helpers::open_queue();
    queue.status = QueueStatus::Paused;

    ReducerTest::new(QueueReducer::new())
        .with_env(queue_env())
        .given_state(queue)
        .when_action(QueueAction::Pause)
        .then_error(|e| {
            assert!(matches!(e, DomainError::InvalidQueueTransition { action: "pause", .. }));
        })
        .run();
}

#[test]
fn closing_stamps_the_time() {
    ReducerTest::new(QueueReducer::new())
        .with_env(queue_env())
        .given_state(helpers::open_queue())
        .when_action(QueueAction::Close)
        .then_state(|queue| {
            assert_eq!(queue.status, QueueStatus::Closed);
            assert_eq!(queue.closed_at, Some(test_clock().time()));
        })
        .run();
}

fn lifecycle_action() -> impl Strategy<Value = TicketAction> {
    prop_oneof![
        Just(TicketAction::ConfirmPayment),
        Just(TicketAction::Call),
        Just(TicketAction::Serve),
        Just(TicketAction::Complete),
        Just(TicketAction::MarkMissed),
        Just(TicketAction::Reactivate),
        Just(TicketAction::Cancel {
            actor: CancellationActor::Staff,
            reason: None,
        }),
        Just(TicketAction::RecordRefund),
    ]
}

proptest! {
    #[test]
    fn rejected_actions_never_touch_the_ticket(
        status in properties::any_ticket_status(),
        action in lifecycle_action(),
    ) {
        let before = Some(ticket_in(status));
        let mut state = before.clone();

        let outcome = TicketReducer::new().reduce(&mut state, action, &ticket_env());

        if outcome.is_err() {
            prop_assert_eq!(state, before);
        } else {
            let ticket = state.unwrap();
            prop_assert_eq!(ticket.number.get(), 7);
        }
    }

    #[test]
    fn terminal_tickets_keep_their_status(
        action in lifecycle_action(),
        completed in any::<bool>(),
    ) {
        let status = if completed { TicketStatus::Completed } else { TicketStatus::Cancelled };
        let mut state = Some(ticket_in(status));
        let settles = matches!(action, TicketAction::ConfirmPayment);

        let outcome = TicketReducer::new().reduce(&mut state, action, &ticket_env());

        // Only a late payment is recorded on an unpaid terminal ticket
        prop_assert_eq!(outcome.is_ok(), settles);
        prop_assert_eq!(state.unwrap().status, status);
    }
}
