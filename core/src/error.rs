//! Domain errors.
//!
//! Every rejection a reducer or the quota arithmetic can produce. None of
//! them is fatal: callers map each variant to a user-visible outcome or absorb
//! it (see the variant docs).

use crate::types::{QueueId, QueueStatus, TicketStatus, TicketTransition};
use thiserror::Error;

/// Errors produced by the pure domain logic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Monthly booking quota exhausted. Recoverable, shown to the user.
    #[error("Monthly booking limit reached ({count}/{limit})")]
    AdmissionDenied {
        /// Bookings counted this month
        count: u32,
        /// Plan limit
        limit: u32,
    },

    /// Queue is paused or closed. Recoverable, shown to the user.
    #[error("Queue {queue_id} is {status} and not accepting tickets")]
    QueueNotAcceptingTickets {
        /// Queue that refused the booking
        queue_id: QueueId,
        /// Its status
        status: QueueStatus,
    },

    /// Transition not in the lifecycle table. The record is left unchanged.
    #[error("Cannot {transition} a ticket that is {from}")]
    InvalidTicketTransition {
        /// Status the ticket was in
        from: TicketStatus,
        /// Attempted transition
        transition: TicketTransition,
    },

    /// Queue status change not allowed from the current status
    #[error("Cannot {action} a queue that is {from}")]
    InvalidQueueTransition {
        /// Status the queue was in
        from: QueueStatus,
        /// Attempted action
        action: &'static str,
    },

    /// The gateway already reported this transaction. Resolved as a no-op.
    #[error("Payment notification for transaction {0} already recorded")]
    DuplicatePaymentNotification(String),

    /// Webhook signature or session lookup failed. Nothing is mutated.
    #[error("Payment gateway verification failed: {0}")]
    GatewayVerificationFailed(String),

    /// Prediction oracle failed. Absorbed by falling back to the hybrid model.
    #[error("Estimator unavailable: {0}")]
    EstimatorUnavailable(String),

    /// Booking action applied to an existing ticket
    #[error("Ticket already exists")]
    TicketAlreadyExists,

    /// Lifecycle action applied before the ticket was booked
    #[error("Ticket not found")]
    TicketNotFound,

    /// Booking request failed validation
    #[error("Invalid booking: {0}")]
    InvalidBooking(String),

    /// Refund requested for a ticket that is not cancelled and paid
    #[error("Ticket is not refundable: {0}")]
    NotRefundable(String),
}
