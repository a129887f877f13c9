//! Real-time rooms, event payloads and outbound notification requests.

use crate::types::{BusinessId, CustomerId, Queue, Ticket, TicketId, TicketNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fan-out room
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Room {
    /// Staff dashboards and public displays for one business
    Business(BusinessId),
    /// One customer's personal devices
    Customer(CustomerId),
    /// Everyone connected
    Global,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Business(id) => write!(f, "business:{id}"),
            Self::Customer(id) => write!(f, "user:{id}"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// A waiting ticket's position and estimate, sent with `queueUpdated`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPosition {
    /// Ticket
    pub ticket_id: TicketId,
    /// Its number
    pub number: TicketNumber,
    /// 1-indexed place among waiting tickets
    pub position: u32,
    /// Estimated minutes until service
    pub estimated_wait_minutes: u32,
}

/// Server → client events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum QueueEvent {
    /// A ticket joined the visible line
    TicketCreated {
        /// The ticket
        ticket: Ticket,
    },
    /// Any change to a ticket
    TicketUpdated {
        /// The ticket
        ticket: Ticket,
    },
    /// A ticket was called to the counter
    TicketCalled {
        /// The ticket
        ticket: Ticket,
    },
    /// Sent to the ticket holder's personal room when called
    YourTicketCalled {
        /// Ticket
        ticket_id: TicketId,
        /// Its number
        number: TicketNumber,
        /// Business calling
        business_id: BusinessId,
        /// Text shown to the customer
        message: String,
    },
    /// Queue status changed or positions were recomputed
    QueueUpdated {
        /// The queue
        queue: Queue,
        /// Waiting tickets in call order (empty for status-only updates)
        positions: Vec<TicketPosition>,
    },
    /// Relayed from the business directory
    BusinessCreated {
        /// Business
        business_id: BusinessId,
        /// Opaque business payload
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Relayed from the business directory
    BusinessUpdated {
        /// Business
        business_id: BusinessId,
        /// Opaque business payload
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Relayed from the business directory
    BusinessDeleted {
        /// Business
        business_id: BusinessId,
    },
}

impl QueueEvent {
    /// Wire name of the event (the `type` tag)
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TicketCreated { .. } => "ticketCreated",
            Self::TicketUpdated { .. } => "ticketUpdated",
            Self::TicketCalled { .. } => "ticketCalled",
            Self::YourTicketCalled { .. } => "yourTicketCalled",
            Self::QueueUpdated { .. } => "queueUpdated",
            Self::BusinessCreated { .. } => "businessCreated",
            Self::BusinessUpdated { .. } => "businessUpdated",
            Self::BusinessDeleted { .. } => "businessDeleted",
        }
    }
}

/// Category of a persisted in-app notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Payment receipts
    Payment,
    /// Ticket lifecycle
    Ticket,
    /// Queue status
    Queue,
    /// System messages
    System,
    /// "It's your turn"
    Turn,
}

/// In-app notification to persist
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient
    pub recipient: CustomerId,
    /// Category
    pub kind: NotificationKind,
    /// Text
    pub message: String,
}

/// Transactional email to send. The recipient's address is resolved by the
/// delivery side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    /// Recipient
    pub recipient: CustomerId,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}
