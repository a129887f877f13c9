//! # Waitline Testing
//!
//! Testing utilities for the Waitline virtual queue.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A Given-When-Then harness for reducers ([`ReducerTest`])
//! - Effect assertions and fixture builders
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use waitline_core::queue::{QueueAction, QueueEnvironment, QueueReducer};
//! use waitline_core::types::QueueStatus;
//! use waitline_testing::{helpers, test_clock, ReducerTest};
//!
//! ReducerTest::new(QueueReducer::new())
//!     .with_env(QueueEnvironment::new(Arc::new(test_clock())))
//!     .given_state(helpers::open_queue())
//!     .when_action(QueueAction::Pause)
//!     .then_state(|queue| assert_eq!(queue.status, QueueStatus::Paused))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use waitline_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use waitline_testing::mocks::FixedClock;
    /// use waitline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// The instant this clock reports
        #[must_use]
        pub const fn time(&self) -> DateTime<Utc> {
            self.time
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it
    ///
    /// Share it behind an `Arc` between the code under test and the test body
    /// to cross month boundaries or age service samples.
    ///
    /// ```
    /// use waitline_testing::mocks::ManualClock;
    /// use waitline_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::minutes(12));
    /// assert_eq!(clock.now(), start + Duration::minutes(12));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start the clock at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            let mut guard = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = time;
        }

        /// Move forward by `by`
        pub fn advance(&self, by: Duration) {
            let mut guard = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Fixture builders for domain records
pub mod helpers {
    use super::{DateTime, Utc};
    use waitline_core::ticket::NewTicket;
    use waitline_core::types::{
        BookingReference, BusinessId, Capacity, CustomerId, Money, PaymentMethod, Priority, Queue,
        QueueId, ServiceType, TicketId, TicketNumber,
    };

    /// An active queue for a fresh business, capacity 50
    #[must_use]
    pub fn open_queue() -> Queue {
        open_queue_at(super::mocks::test_clock().time())
    }

    /// An active queue opened at `opened_at`
    #[must_use]
    pub fn open_queue_at(opened_at: DateTime<Utc>) -> Queue {
        Queue::open(QueueId::new(), BusinessId::new(), Capacity::new(50), opened_at)
    }

    /// A cash booking for `queue` with the given number and a customer
    #[must_use]
    pub fn cash_booking(queue: &Queue, number: u32) -> NewTicket {
        NewTicket {
            id: TicketId::new(),
            queue_id: queue.id,
            business_id: queue.business_id,
            customer_id: Some(CustomerId::new()),
            booking_reference: BookingReference::generate(),
            number: TicketNumber::new(number),
            service_type: ServiceType::Examination,
            priority: Priority::Normal,
            payment_method: PaymentMethod::Cash,
            price: Money::ZERO,
        }
    }

    /// An online booking for `queue` priced at `cents`
    #[must_use]
    pub fn online_booking(queue: &Queue, number: u32, cents: u64) -> NewTicket {
        NewTicket {
            payment_method: PaymentMethod::Online,
            price: Money::from_cents(cents),
            ..cash_booking(queue, number)
        }
    }
}

/// Property-based testing strategies for domain types
pub mod properties {
    use proptest::prelude::*;
    use waitline_core::types::{PaymentMethod, ServiceType, TicketStatus};

    /// Any ticket status
    pub fn any_ticket_status() -> impl Strategy<Value = TicketStatus> {
        prop_oneof![
            Just(TicketStatus::PendingPayment),
            Just(TicketStatus::Waiting),
            Just(TicketStatus::Called),
            Just(TicketStatus::InProgress),
            Just(TicketStatus::Completed),
            Just(TicketStatus::Missed),
            Just(TicketStatus::Cancelled),
        ]
    }

    /// Any service type
    pub fn any_service_type() -> impl Strategy<Value = ServiceType> {
        prop_oneof![
            Just(ServiceType::Examination),
            Just(ServiceType::Consultation),
            Just(ServiceType::Procedure),
            Just(ServiceType::FollowUp),
            Just(ServiceType::Other),
        ]
    }

    /// Cash or online with a price in cents (zero included)
    pub fn any_payment() -> impl Strategy<Value = (PaymentMethod, u64)> {
        (
            prop_oneof![Just(PaymentMethod::Cash), Just(PaymentMethod::Online)],
            prop_oneof![Just(0u64), 100u64..50_000],
        )
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
