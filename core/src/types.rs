//! Domain types for the Waitline virtual queue.
//!
//! Identifiers, value objects and the two central records: [`Queue`] (a
//! business's daily sequencing context) and [`Ticket`] (one customer's place
//! in that queue).

use crate::error::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a business (tenant)
    BusinessId
);
uuid_id!(
    /// Unique identifier for a queue instance
    QueueId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a customer account
    CustomerId
);
uuid_id!(
    /// Unique identifier for a payment record
    PaymentId
);

/// Client-supplied idempotency key for a booking, also used as the gateway
/// reference id for online payments.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingReference(String);

impl BookingReference {
    /// Wrap an existing reference string
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Generate a fresh reference for requests that did not send one
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("bk_{}", Uuid::new_v4().simple()))
    }

    /// Borrow the reference string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Money amount in cents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Create from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Get amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Whether the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Sequential ticket number, unique within a queue instance and starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// Wrap a raw number
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// Get the raw number
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Advisory queue capacity. Shown to staff, never enforced on bookings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capacity(u32);

impl Capacity {
    /// Create a capacity hint
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw value
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Kind of service a ticket is booked for. Scales the wait estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Standard examination
    Examination,
    /// Consultation
    Consultation,
    /// Procedure
    Procedure,
    /// Follow-up visit
    FollowUp,
    /// Anything not listed above
    Other,
}

impl ServiceType {
    /// Multiplier applied to the per-ticket estimate
    #[must_use]
    pub const fn multiplier(self) -> f64 {
        match self {
            Self::Examination | Self::Other => 1.0,
            Self::Consultation => 1.5,
            Self::Procedure => 2.0,
            Self::FollowUp => 0.7,
        }
    }

    /// Parse a service name, mapping unknown names to [`ServiceType::Other`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "examination" => Self::Examination,
            "consultation" => Self::Consultation,
            "procedure" => Self::Procedure,
            "follow_up" | "followup" => Self::FollowUp,
            _ => Self::Other,
        }
    }
}

impl<'de> Deserialize<'de> for ServiceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Priority tier recorded on a ticket.
///
/// Informational only: calling order is strictly by ticket number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Regular customer
    #[default]
    Normal,
    /// Elevated (e.g. elderly, pregnant)
    Elevated,
    /// Urgent
    Urgent,
}

/// How the customer pays for the ticket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Pays at the counter
    #[default]
    Cash,
    /// Pays through the payment gateway before joining the line
    Online,
}

/// Payment state of a ticket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Nothing settled yet
    #[default]
    Unpaid,
    /// Settled by the payment reconciler
    Paid,
    /// Paid and later refunded
    Refunded,
}

// ============================================================================
// Queue
// ============================================================================

/// Queue status. `Closed` is terminal; reopening creates a new queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Accepting bookings
    Active,
    /// Temporarily not accepting bookings
    Paused,
    /// Finished for the day
    Closed,
}

impl QueueStatus {
    /// Stable lowercase name, as stored and sent over the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Closed => "closed",
        }
    }

    /// Parse a stored status name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One business's daily ticket-dispensing context
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    /// Queue ID
    pub id: QueueId,
    /// Owning business
    pub business_id: BusinessId,
    /// Advisory capacity
    pub capacity: Capacity,
    /// Tickets currently occupying the queue (not completed or cancelled)
    pub current_count: u32,
    /// Status
    pub status: QueueStatus,
    /// Last allocated ticket number (0 before the first booking)
    pub current_ticket_number: u32,
    /// When the queue was opened
    pub opened_at: DateTime<Utc>,
    /// When the queue was closed
    pub closed_at: Option<DateTime<Utc>>,
}

impl Queue {
    /// Open a fresh queue: active, counters at zero.
    #[must_use]
    pub const fn open(
        id: QueueId,
        business_id: BusinessId,
        capacity: Capacity,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            business_id,
            capacity,
            current_count: 0,
            status: QueueStatus::Active,
            current_ticket_number: 0,
            opened_at,
            closed_at: None,
        }
    }

    /// Whether the queue accepts new tickets
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.status == QueueStatus::Active
    }

    /// Increment the counter and occupied count, returning the new number.
    ///
    /// Stores call this while holding the record exclusively, so it is the
    /// in-memory form of the atomic increment-and-return.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::QueueNotAcceptingTickets`] if the queue is not
    /// active.
    pub fn allocate_number(&mut self) -> Result<TicketNumber, DomainError> {
        if !self.is_accepting() {
            return Err(DomainError::QueueNotAcceptingTickets {
                queue_id: self.id,
                status: self.status,
            });
        }
        self.current_ticket_number += 1;
        self.current_count += 1;
        Ok(TicketNumber::new(self.current_ticket_number))
    }

    /// Release one occupied slot, flooring at zero.
    pub const fn release_slot(&mut self) {
        self.current_count = self.current_count.saturating_sub(1);
    }

    /// Whether the occupied count exceeds the advisory capacity
    #[must_use]
    pub const fn is_over_capacity(&self) -> bool {
        self.current_count > self.capacity.get()
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Ticket status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Online booking waiting for the gateway to settle
    PendingPayment,
    /// In line
    Waiting,
    /// Called to the counter
    Called,
    /// Being served
    InProgress,
    /// Served
    #[serde(alias = "done", alias = "ended")]
    Completed,
    /// Did not show up when called
    Missed,
    /// Cancelled by customer, staff or system
    Cancelled,
}

/// Events that move a ticket between statuses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketTransition {
    /// Payment reconciler settled the payment
    ConfirmPayment,
    /// Staff called the ticket
    Call,
    /// Service started
    Serve,
    /// Service finished
    Complete,
    /// No-show
    MarkMissed,
    /// Staff override bringing a missed ticket back
    Reactivate,
    /// Cancellation
    Cancel,
}

impl fmt::Display for TicketTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConfirmPayment => "confirm payment for",
            Self::Call => "call",
            Self::Serve => "serve",
            Self::Complete => "complete",
            Self::MarkMissed => "mark missed",
            Self::Reactivate => "reactivate",
            Self::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

impl TicketStatus {
    /// Apply a transition, returning the target status.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTicketTransition`] for any pair not in
    /// the lifecycle table.
    pub fn transition(self, transition: TicketTransition) -> Result<Self, DomainError> {
        use TicketStatus as S;
        use TicketTransition as T;

        match (self, transition) {
            (S::PendingPayment, T::ConfirmPayment) | (S::Missed, T::Reactivate) => Ok(S::Waiting),
            (S::Waiting, T::Call) => Ok(S::Called),
            (S::Called, T::Serve) => Ok(S::InProgress),
            (S::InProgress, T::Complete) => Ok(S::Completed),
            (S::Waiting | S::Called, T::MarkMissed) => Ok(S::Missed),
            (S::PendingPayment | S::Waiting | S::Called | S::InProgress, T::Cancel) => {
                Ok(S::Cancelled)
            }
            (from, transition) => Err(DomainError::InvalidTicketTransition { from, transition }),
        }
    }

    /// Completed or cancelled
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Statuses a queue close sweeps into `Cancelled`
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::PendingPayment | Self::Waiting | Self::Called | Self::InProgress
        )
    }

    /// Stable lowercase name, as stored and sent over the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Waiting => "waiting",
            Self::Called => "called",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Missed => "missed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status name, accepting the `done`/`ended` aliases.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending_payment" => Some(Self::PendingPayment),
            "waiting" => Some(Self::Waiting),
            "called" => Some(Self::Called),
            "in_progress" => Some(Self::InProgress),
            "completed" | "done" | "ended" => Some(Self::Completed),
            "missed" => Some(Self::Missed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who cancelled a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CancellationActor {
    /// The ticket holder
    Customer(CustomerId),
    /// Business staff
    Staff,
    /// The system (e.g. queue closed)
    System,
}

/// Cancellation details recorded on a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// Who cancelled
    pub actor: CancellationActor,
    /// Optional free-text reason
    pub reason: Option<String>,
    /// When
    pub cancelled_at: DateTime<Utc>,
}

/// A customer's place in a queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Owning queue
    pub queue_id: QueueId,
    /// Owning business
    pub business_id: BusinessId,
    /// Customer, absent for walk-ins
    pub customer_id: Option<CustomerId>,
    /// Idempotency key and gateway reference
    pub booking_reference: BookingReference,
    /// Assigned number (immutable)
    pub number: TicketNumber,
    /// Service booked
    pub service_type: ServiceType,
    /// Status
    pub status: TicketStatus,
    /// Priority tier (informational)
    pub priority: Priority,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Price
    pub price: Money,
    /// Estimated wait in minutes
    pub estimated_wait_minutes: Option<u32>,
    /// Expected service time
    pub expected_service_at: Option<DateTime<Utc>>,
    /// Booking time
    pub created_at: DateTime<Utc>,
    /// When the ticket was called
    pub called_at: Option<DateTime<Utc>>,
    /// When service started
    pub started_at: Option<DateTime<Utc>>,
    /// When service finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Cancellation details
    pub cancellation: Option<Cancellation>,
}

impl Ticket {
    /// Whether the ticket needs gateway settlement before joining the line
    #[must_use]
    pub fn requires_online_payment(&self) -> bool {
        self.payment_method == PaymentMethod::Online && !self.price.is_zero()
    }

    /// Service duration (`completed_at - called_at`) in minutes
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Durations are far below 2^52 ms
    pub fn service_duration_minutes(&self) -> Option<f64> {
        let called = self.called_at?;
        let completed = self.completed_at?;
        Some((completed - called).num_milliseconds() as f64 / 60_000.0)
    }
}

// ============================================================================
// Payments
// ============================================================================

/// Status of a payment record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRecordStatus {
    /// Created, not settled
    Pending,
    /// Settled
    Completed,
    /// Gateway reported failure
    Failed,
    /// Refunded
    Refunded,
}

impl PaymentRecordStatus {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse a stored status name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// A settled (or refunded) gateway payment for a ticket.
///
/// `transaction_id` is unique across all records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment ID
    pub id: PaymentId,
    /// Ticket paid for
    pub ticket_id: TicketId,
    /// Business receiving the payment
    pub business_id: BusinessId,
    /// Paying customer, if known
    pub payer: Option<CustomerId>,
    /// Amount reported by the gateway
    pub amount: Money,
    /// External transaction id
    pub transaction_id: String,
    /// Status
    pub status: PaymentRecordStatus,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn allocate_number_starts_at_one_and_counts_occupancy() {
        let mut queue = Queue::open(QueueId::new(), BusinessId::new(), Capacity::new(2), Utc::now());

        assert_eq!(queue.allocate_number().unwrap(), TicketNumber::new(1));
        assert_eq!(queue.allocate_number().unwrap(), TicketNumber::new(2));
        assert_eq!(queue.allocate_number().unwrap(), TicketNumber::new(3));
        assert_eq!(queue.current_count, 3);
        assert!(queue.is_over_capacity());
    }

    #[test]
    fn paused_queue_refuses_numbers() {
        let mut queue = Queue::open(QueueId::new(), BusinessId::new(), Capacity::new(10), Utc::now());
        queue.status = QueueStatus::Paused;

        let err = queue.allocate_number().unwrap_err();
        assert!(matches!(err, DomainError::QueueNotAcceptingTickets { .. }));
        assert_eq!(queue.current_ticket_number, 0);
    }

    #[test]
    fn release_slot_floors_at_zero() {
        let mut queue = Queue::open(QueueId::new(), BusinessId::new(), Capacity::new(10), Utc::now());
        queue.release_slot();
        assert_eq!(queue.current_count, 0);
    }

    #[test]
    fn completed_aliases_deserialize() {
        let done: TicketStatus = serde_json::from_str("\"done\"").unwrap();
        let ended: TicketStatus = serde_json::from_str("\"ended\"").unwrap();
        assert_eq!(done, TicketStatus::Completed);
        assert_eq!(ended, TicketStatus::Completed);
        assert_eq!(TicketStatus::parse("ended"), Some(TicketStatus::Completed));
    }

    #[test]
    fn unknown_service_type_maps_to_other() {
        let service: ServiceType = serde_json::from_str("\"x-ray\"").unwrap();
        assert_eq!(service, ServiceType::Other);
        assert_eq!(ServiceType::parse("follow-up"), ServiceType::FollowUp);
        assert!((ServiceType::Procedure.multiplier() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missed_can_only_be_reactivated() {
        assert_eq!(
            TicketStatus::Missed.transition(TicketTransition::Reactivate).unwrap(),
            TicketStatus::Waiting
        );
        assert!(TicketStatus::Missed.transition(TicketTransition::Cancel).is_err());
        assert!(TicketStatus::Missed.transition(TicketTransition::Call).is_err());
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(1250).to_string(), "12.50");
    }
}
