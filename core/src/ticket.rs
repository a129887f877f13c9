//! Ticket lifecycle reducer.
//!
//! Every ticket mutation goes through [`TicketReducer`]. The reducer checks
//! the transition against [`TicketStatus::transition`], stamps timestamps from
//! the injected clock and describes the broadcasts and notifications the
//! change causes. On error the ticket is left untouched.
//!
//! | From | Action | To |
//! |---|---|---|
//! | (none) | `Book` (online, price > 0) | `pending_payment` |
//! | (none) | `Book` (cash or free) | `waiting` |
//! | `pending_payment` | `ConfirmPayment` | `waiting` |
//! | `waiting` | `Call` | `called` |
//! | `called` | `Serve` | `in_progress` |
//! | `in_progress` | `Complete` | `completed` |
//! | `waiting`, `called` | `MarkMissed` | `missed` |
//! | `missed` | `Reactivate` | `waiting` |
//! | any non-terminal except `missed` | `Cancel` | `cancelled` |

use crate::effect::{Effect, Effects};
use crate::environment::Clock;
use crate::error::DomainError;
use crate::events::{EmailRequest, Notification, NotificationKind, QueueEvent, Room};
use crate::reducer::Reducer;
use crate::types::{
    BookingReference, BusinessId, Cancellation, CancellationActor, CustomerId, Money,
    PaymentMethod, PaymentStatus, Priority, QueueId, ServiceType, Ticket, TicketId, TicketNumber,
    TicketStatus, TicketTransition,
};
use chrono::{DateTime, Utc};
use smallvec::smallvec;
use std::sync::Arc;

// ============================================================================
// Actions
// ============================================================================

/// A booking that has passed admission and received its number
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTicket {
    /// Ticket ID
    pub id: TicketId,
    /// Queue the number came from
    pub queue_id: QueueId,
    /// Owning business
    pub business_id: BusinessId,
    /// Customer, absent for walk-ins
    pub customer_id: Option<CustomerId>,
    /// Idempotency key
    pub booking_reference: BookingReference,
    /// Allocated number
    pub number: TicketNumber,
    /// Service booked
    pub service_type: ServiceType,
    /// Priority tier
    pub priority: Priority,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Price
    pub price: Money,
}

/// Actions for the ticket lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketAction {
    /// Create the ticket
    Book(NewTicket),
    /// Payment reconciler settled the gateway payment
    ConfirmPayment,
    /// Staff called the ticket
    Call,
    /// Service started
    Serve,
    /// Service finished
    Complete,
    /// No-show
    MarkMissed,
    /// Bring a missed ticket back into the line
    Reactivate,
    /// Cancel the ticket
    Cancel {
        /// Who cancelled
        actor: CancellationActor,
        /// Optional reason
        reason: Option<String>,
    },
    /// Record a gateway refund on a cancelled paid ticket
    RecordRefund,
    /// Attach a fresh wait estimate
    AttachEstimate {
        /// Minutes until service
        minutes: u32,
        /// Expected service time
        expected_at: DateTime<Utc>,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the ticket lifecycle
#[derive(Clone)]
pub struct TicketEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
}

impl TicketEnvironment {
    /// Creates a new `TicketEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the ticket lifecycle
#[derive(Clone, Debug, Default)]
pub struct TicketReducer;

impl TicketReducer {
    /// Creates a new `TicketReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn book(ticket: NewTicket, now: DateTime<Utc>) -> Ticket {
        let status = if ticket.payment_method == PaymentMethod::Online && !ticket.price.is_zero() {
            TicketStatus::PendingPayment
        } else {
            TicketStatus::Waiting
        };

        Ticket {
            id: ticket.id,
            queue_id: ticket.queue_id,
            business_id: ticket.business_id,
            customer_id: ticket.customer_id,
            booking_reference: ticket.booking_reference,
            number: ticket.number,
            service_type: ticket.service_type,
            status,
            priority: ticket.priority,
            payment_status: PaymentStatus::Unpaid,
            payment_method: ticket.payment_method,
            price: ticket.price,
            estimated_wait_minutes: None,
            expected_service_at: None,
            created_at: now,
            called_at: None,
            started_at: None,
            completed_at: None,
            cancellation: None,
        }
    }

    fn updated(ticket: &Ticket) -> Effect {
        Effect::publish(
            Room::Business(ticket.business_id),
            QueueEvent::TicketUpdated {
                ticket: ticket.clone(),
            },
        )
    }

    fn notify(ticket: &Ticket, kind: NotificationKind, message: String) -> Option<Effect> {
        ticket.customer_id.map(|recipient| {
            Effect::Notify(Notification {
                recipient,
                kind,
                message,
            })
        })
    }

    fn email(ticket: &Ticket, subject: String, body: String) -> Option<Effect> {
        ticket.customer_id.map(|recipient| {
            Effect::Email(EmailRequest {
                recipient,
                subject,
                body,
            })
        })
    }

    /// Move `ticket` through `transition`, stamping timestamps.
    fn advance(
        ticket: &mut Ticket,
        transition: TicketTransition,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let next = ticket.status.transition(transition)?;
        match transition {
            TicketTransition::Call => ticket.called_at = Some(now),
            TicketTransition::Serve => ticket.started_at = Some(now),
            TicketTransition::Complete => ticket.completed_at = Some(now),
            _ => {}
        }
        ticket.status = next;
        Ok(())
    }

    fn call_effects(ticket: &Ticket) -> Effects {
        let mut effects: Effects = smallvec![
            Self::updated(ticket),
            Effect::publish(
                Room::Business(ticket.business_id),
                QueueEvent::TicketCalled {
                    ticket: ticket.clone(),
                },
            ),
        ];

        if let Some(customer) = ticket.customer_id {
            let message = format!(
                "It's your turn! Ticket #{} please proceed to the counter.",
                ticket.number
            );
            effects.push(Effect::publish(
                Room::Customer(customer),
                QueueEvent::YourTicketCalled {
                    ticket_id: ticket.id,
                    number: ticket.number,
                    business_id: ticket.business_id,
                    message: message.clone(),
                },
            ));
            effects.extend(Self::notify(ticket, NotificationKind::Turn, message.clone()));
            effects.extend(Self::email(
                ticket,
                format!("Ticket #{} is being called", ticket.number),
                message,
            ));
        }

        effects
    }

    fn confirm_payment(ticket: &mut Ticket) -> Effects {
        if ticket.payment_status == PaymentStatus::Paid {
            return Effects::new();
        }

        ticket.payment_status = PaymentStatus::Paid;
        let joined_line = ticket.status == TicketStatus::PendingPayment;
        if joined_line {
            ticket.status = TicketStatus::Waiting;
        }

        let broadcast = if joined_line {
            Effect::publish(
                Room::Business(ticket.business_id),
                QueueEvent::TicketCreated {
                    ticket: ticket.clone(),
                },
            )
        } else {
            Self::updated(ticket)
        };

        let receipt = format!(
            "Payment of {} received for ticket #{}.",
            ticket.price, ticket.number
        );
        let mut effects: Effects = smallvec![broadcast];
        effects.extend(Self::notify(ticket, NotificationKind::Payment, receipt.clone()));
        effects.extend(Self::email(ticket, "Payment receipt".to_string(), receipt));
        effects
    }

    fn booked_effects(ticket: &Ticket) -> Effects {
        // Pending tickets stay invisible until the reconciler settles them.
        if ticket.status != TicketStatus::Waiting {
            return Effects::new();
        }
        let mut effects: Effects = smallvec![Effect::publish(
            Room::Business(ticket.business_id),
            QueueEvent::TicketCreated {
                ticket: ticket.clone(),
            },
        )];
        effects.extend(Self::notify(
            ticket,
            NotificationKind::Ticket,
            format!("Your ticket #{} has been booked.", ticket.number),
        ));
        effects
    }

    fn apply(
        ticket: &mut Ticket,
        action: TicketAction,
        now: DateTime<Utc>,
    ) -> Result<Effects, DomainError> {
        match action {
            TicketAction::Book(_) => Err(DomainError::TicketAlreadyExists),
            TicketAction::ConfirmPayment => Ok(Self::confirm_payment(ticket)),
            TicketAction::Call => {
                Self::advance(ticket, TicketTransition::Call, now)?;
                Ok(Self::call_effects(ticket))
            }
            TicketAction::Serve => {
                Self::advance(ticket, TicketTransition::Serve, now)?;
                Ok(smallvec![Self::updated(ticket)])
            }
            TicketAction::Complete => {
                Self::advance(ticket, TicketTransition::Complete, now)?;
                let mut effects: Effects = smallvec![Self::updated(ticket)];
                effects.extend(Self::notify(
                    ticket,
                    NotificationKind::Ticket,
                    format!("Ticket #{} has been completed. Thank you!", ticket.number),
                ));
                Ok(effects)
            }
            TicketAction::MarkMissed => {
                Self::advance(ticket, TicketTransition::MarkMissed, now)?;
                let mut effects: Effects = smallvec![Self::updated(ticket)];
                effects.extend(Self::notify(
                    ticket,
                    NotificationKind::Ticket,
                    format!("Ticket #{} was marked as missed.", ticket.number),
                ));
                Ok(effects)
            }
            TicketAction::Reactivate => {
                Self::advance(ticket, TicketTransition::Reactivate, now)?;
                Ok(smallvec![Self::updated(ticket)])
            }
            TicketAction::Cancel { actor, reason } => {
                Self::advance(ticket, TicketTransition::Cancel, now)?;
                ticket.cancellation = Some(Cancellation {
                    actor,
                    reason,
                    cancelled_at: now,
                });

                let mut effects: Effects = smallvec![Self::updated(ticket)];
                let by_holder = matches!(
                    (actor, ticket.customer_id),
                    (CancellationActor::Customer(by), Some(holder)) if by == holder
                );
                if !by_holder {
                    effects.extend(Self::notify(
                        ticket,
                        NotificationKind::Ticket,
                        format!("Ticket #{} has been cancelled.", ticket.number),
                    ));
                }
                Ok(effects)
            }
            TicketAction::RecordRefund => {
                if ticket.status != TicketStatus::Cancelled
                    || ticket.payment_status != PaymentStatus::Paid
                {
                    return Err(DomainError::NotRefundable(format!(
                        "ticket is {} and {:?}",
                        ticket.status, ticket.payment_status
                    )));
                }
                ticket.payment_status = PaymentStatus::Refunded;

                let mut effects: Effects = smallvec![Self::updated(ticket)];
                effects.extend(Self::notify(
                    ticket,
                    NotificationKind::Payment,
                    format!("Refund of {} issued for ticket #{}.", ticket.price, ticket.number),
                ));
                Ok(effects)
            }
            TicketAction::AttachEstimate {
                minutes,
                expected_at,
            } => {
                ticket.estimated_wait_minutes = Some(minutes);
                ticket.expected_service_at = Some(expected_at);
                Ok(Effects::new())
            }
        }
    }
}

impl Reducer for TicketReducer {
    type State = Option<Ticket>;
    type Action = TicketAction;
    type Environment = TicketEnvironment;
    type Error = DomainError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects, Self::Error> {
        let now = env.clock.now();

        match action {
            TicketAction::Book(new_ticket) => {
                if state.is_some() {
                    return Err(DomainError::TicketAlreadyExists);
                }
                let ticket = Self::book(new_ticket, now);
                let effects = Self::booked_effects(&ticket);
                *state = Some(ticket);
                Ok(effects)
            }
            other => {
                let ticket = state.as_mut().ok_or(DomainError::TicketNotFound)?;
                Self::apply(ticket, other, now)
            }
        }
    }
}
