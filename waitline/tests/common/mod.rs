//! Shared wiring for integration tests: the full service on the in-memory
//! store, the mock gateway, recording collaborators and a manual clock.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use waitline::collaborators::{InMemoryNotifications, RecordingMailer};
use waitline::config::Config;
use waitline::engine::{BookingOutcome, BookingRequest};
use waitline::estimator::NoOracle;
use waitline::payment_gateway::MockPaymentGateway;
use waitline::store::InMemoryStore;
use waitline::{AppState, Dependencies};
use waitline_core::subscription::PlanTier;
use waitline_core::types::{
    BusinessId, CustomerId, Money, PaymentMethod, Priority, Queue, ServiceType,
};
use waitline_testing::mocks::ManualClock;

/// Webhook secret the mock gateway signs with
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// The service plus handles on every test double
pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<MockPaymentGateway>,
    pub mailer: Arc<RecordingMailer>,
    pub notifications: Arc<InMemoryNotifications>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Service starting mid-month (2025-06-11 10:00 UTC)
    pub fn new() -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(2025, 6, 11, 10, 0, 0).unwrap())
    }

    pub fn starting_at(start: chrono::DateTime<Utc>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(MockPaymentGateway::new(WEBHOOK_SECRET, 300));
        let mailer = Arc::new(RecordingMailer::new());
        let notifications = Arc::new(InMemoryNotifications::new());
        let clock = Arc::new(ManualClock::new(start));

        let state = AppState::new(
            Config::default(),
            Dependencies {
                store: store.clone(),
                database: None,
                gateway: gateway.clone(),
                oracle: Arc::new(NoOracle),
                mailer: mailer.clone(),
                notifications: notifications.clone(),
                clock: clock.clone(),
            },
        );

        Self {
            state,
            store,
            gateway,
            mailer,
            notifications,
            clock,
        }
    }

    /// Open a queue for a new business
    pub async fn open_queue(&self) -> Queue {
        self.state
            .register
            .open(BusinessId::new(), None)
            .await
            .expect("queue opens")
    }

    /// Open a queue for a new business on the given plan
    pub async fn open_queue_on(&self, plan: PlanTier) -> Queue {
        let queue = self.open_queue().await;
        self.state
            .admission
            .set_plan(queue.business_id, plan)
            .await
            .expect("plan set");
        queue
    }

    /// Book a free cash ticket for a new customer
    pub async fn book_cash(&self, queue: &Queue) -> BookingOutcome {
        self.state
            .engine
            .book(cash_request(queue))
            .await
            .expect("cash booking succeeds")
    }

    /// Book an online ticket priced at `cents`
    pub async fn book_online(&self, queue: &Queue, cents: u64) -> BookingOutcome {
        self.state
            .engine
            .book(BookingRequest {
                payment_method: PaymentMethod::Online,
                price: Money::from_cents(cents),
                ..cash_request(queue)
            })
            .await
            .expect("online booking succeeds")
    }
}

/// A cash booking request for a new customer
pub fn cash_request(queue: &Queue) -> BookingRequest {
    BookingRequest {
        business_id: queue.business_id,
        queue_id: None,
        customer_id: Some(CustomerId::new()),
        service_type: ServiceType::Examination,
        payment_method: PaymentMethod::Cash,
        price: Money::ZERO,
        booking_reference: None,
        priority: Priority::Normal,
    }
}
