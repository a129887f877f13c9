//! Durable storage for queues, tickets, payments and subscription counters.
//!
//! Every operation that must stay correct under concurrent requests is a
//! single atomic store call: number allocation (increment-and-return), quota
//! consumption (reset-if-new-month then increment-if-below-limit), payment
//! insertion (unique transaction id) and ticket updates (compare-and-swap on
//! the previous status). Services never read-modify-write these fields
//! themselves.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use waitline_core::DomainError;
use waitline_core::eta::ServiceSample;
use waitline_core::subscription::{AdmissionDecision, PlanTier, Subscription};
use waitline_core::types::{
    BookingReference, BusinessId, CustomerId, PaymentId, PaymentRecord, PaymentRecordStatus,
    PaymentStatus, Queue, QueueId, QueueStatus, Ticket, TicketId, TicketNumber, TicketStatus,
};

/// Errors that can occur in store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Record does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Uniqueness or compare-and-swap conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Domain rule enforced inside an atomic store operation
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Stored row could not be mapped back to a domain value
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Failure injected by tests
    #[error("Injected failure: {0}")]
    Injected(&'static str),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Queue Register persistence
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new queue.
    ///
    /// Fails with [`StoreError::Conflict`] if the business already has a
    /// queue that is not closed.
    async fn insert_queue(&self, queue: &Queue) -> Result<()>;

    /// Load a queue
    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>>;

    /// The business's queue that is not closed, if any
    async fn current_queue(&self, business_id: BusinessId) -> Result<Option<Queue>>;

    /// Persist a status change if the stored status is still `expected`.
    async fn update_queue_status(&self, queue: &Queue, expected: QueueStatus) -> Result<()>;

    /// Atomically increment the counter and occupied count.
    ///
    /// Fails with [`DomainError::QueueNotAcceptingTickets`] for a queue that
    /// is not active.
    async fn allocate_number(&self, id: QueueId) -> Result<TicketNumber>;

    /// Decrement the occupied count, flooring at zero
    async fn release_slot(&self, id: QueueId) -> Result<()>;
}

/// Ticket persistence
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert a new ticket; a duplicate booking reference is a conflict.
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<()>;

    /// Load a ticket
    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>>;

    /// Look a ticket up by its booking reference
    async fn find_by_reference(&self, reference: &BookingReference) -> Result<Option<Ticket>>;

    /// Compare-and-swap update: writes `ticket` only if the stored status and
    /// payment status still equal the expected values.
    async fn update_ticket(
        &self,
        ticket: &Ticket,
        expected_status: TicketStatus,
        expected_payment: PaymentStatus,
    ) -> Result<()>;

    /// Overwrite the wait estimate (not a lifecycle change)
    async fn update_estimate(
        &self,
        id: TicketId,
        minutes: u32,
        expected_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Tickets of a queue in the given statuses, ordered by number
    async fn queue_tickets(&self, queue_id: QueueId, statuses: &[TicketStatus])
    -> Result<Vec<Ticket>>;

    /// A customer's tickets, newest first
    async fn customer_tickets(&self, customer_id: CustomerId) -> Result<Vec<Ticket>>;

    /// Most recent valid service durations for a business, newest first
    async fn recent_samples(&self, business_id: BusinessId, limit: usize)
    -> Result<Vec<ServiceSample>>;

    /// Valid service durations completed since `since`, newest first
    async fn samples_since(
        &self,
        business_id: BusinessId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ServiceSample>>;

    /// Hard delete. Returns whether a ticket was removed.
    async fn delete_ticket(&self, id: TicketId) -> Result<bool>;
}

/// Payment record persistence
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a record unless its transaction id is already known.
    /// Returns `false` for a duplicate.
    async fn insert_payment(&self, record: &PaymentRecord) -> Result<bool>;

    /// Records for a ticket, oldest first
    async fn payments_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<PaymentRecord>>;

    /// Change a record's status
    async fn set_payment_status(&self, id: PaymentId, status: PaymentRecordStatus) -> Result<()>;
}

/// Subscription usage counter persistence
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Load a business's subscription
    async fn get_subscription(&self, business_id: BusinessId) -> Result<Option<Subscription>>;

    /// Create or change a business's plan, keeping its counter
    async fn set_plan(
        &self,
        business_id: BusinessId,
        plan: PlanTier,
        now: DateTime<Utc>,
    ) -> Result<Subscription>;

    /// Atomically roll the counter over if the month changed, then count one
    /// admission if below the plan limit.
    ///
    /// Businesses without a subscription start on the basic plan. Fails with
    /// [`DomainError::AdmissionDenied`] at the limit.
    async fn consume_admission(
        &self,
        business_id: BusinessId,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision>;

    /// Give back one admission consumed at `consumed_at` (same month only)
    async fn release_admission(
        &self,
        business_id: BusinessId,
        consumed_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Everything the service needs from storage
pub trait Store: QueueStore + TicketStore + PaymentStore + SubscriptionStore {}

impl<T> Store for T where T: QueueStore + TicketStore + PaymentStore + SubscriptionStore {}
