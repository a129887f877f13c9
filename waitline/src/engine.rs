//! Lifecycle Engine.
//!
//! Books tickets (admission, numbering, estimate, checkout) and drives every
//! later transition through [`TicketReducer`]. Each transition is persisted
//! with a compare-and-swap on the previous status, so two staff members
//! racing on the same ticket cannot both win. Effects run only after the
//! store accepted the change.

use crate::estimator::EtaEstimator;
use crate::metrics;
use crate::payment_gateway::{CheckoutRequest, CheckoutSession, PaymentGateway, PaymentGatewayError};
use crate::register::QUEUE_CLOSED_REASON;
use crate::runtime::EffectRunner;
use crate::store::{Store, StoreError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use waitline_core::DomainError;
use waitline_core::effect::{Effect, Effects, effects};
use waitline_core::environment::Clock;
use waitline_core::eta::{Estimate, position_eta};
use waitline_core::events::{QueueEvent, Room, TicketPosition};
use waitline_core::reducer::Reducer;
use waitline_core::ticket::{NewTicket, TicketAction, TicketEnvironment, TicketReducer};
use waitline_core::types::{
    BookingReference, BusinessId, CancellationActor, CustomerId, Money, PaymentMethod, Priority,
    Queue, QueueId, QueueStatus, ServiceType, Ticket, TicketId, TicketNumber, TicketStatus,
};

/// Attempts before a compare-and-swap conflict is reported
const CAS_ATTEMPTS: usize = 3;

/// Errors surfaced by the engine and the services built on it
#[derive(Error, Debug)]
pub enum EngineError {
    /// A domain rule rejected the request
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Storage failed
    #[error(transparent)]
    Store(StoreError),

    /// Payment gateway failed
    #[error(transparent)]
    Gateway(#[from] PaymentGatewayError),

    /// Referenced record does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Concurrent modification won the race
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(e) => Self::Domain(e),
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Store(other),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Booking intake
#[derive(Debug, Clone)]
pub struct BookingRequest {
    /// Business to join
    pub business_id: BusinessId,
    /// Specific queue; defaults to the business's open queue
    pub queue_id: Option<QueueId>,
    /// Customer, absent for guests and walk-ins
    pub customer_id: Option<CustomerId>,
    /// Service booked
    pub service_type: ServiceType,
    /// How the customer pays
    pub payment_method: PaymentMethod,
    /// Price
    pub price: Money,
    /// Client-supplied idempotency key
    pub booking_reference: Option<BookingReference>,
    /// Priority tier (informational)
    pub priority: Priority,
}

/// Result of a booking
#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    /// The ticket
    pub ticket: Ticket,
    /// Hosted checkout for online tickets awaiting payment
    pub checkout: Option<CheckoutSession>,
    /// `true` when the reference had already been booked
    pub replayed: bool,
}

/// Dashboard view of a business's queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// `active`, `paused`, or `not_started` when no queue is open
    pub status: String,
    /// The open queue
    pub queue: Option<Queue>,
    /// Ticket currently at the counter
    pub now_serving: Option<TicketNumber>,
    /// Waiting tickets in call order
    pub waiting: Vec<TicketPosition>,
    /// Tickets awaiting online payment
    pub pending_payment: usize,
    /// Tickets called or in service
    pub in_service: usize,
    /// Missed tickets that can be reactivated
    pub missed: usize,
}

/// Ticket lifecycle orchestration
#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<dyn Store>,
    estimator: EtaEstimator,
    gateway: Arc<dyn PaymentGateway>,
    runner: EffectRunner,
    clock: Arc<dyn Clock>,
    gateway_timeout: Duration,
    reducer: TicketReducer,
    env: TicketEnvironment,
}

impl LifecycleEngine {
    /// Create an engine
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        estimator: EtaEstimator,
        gateway: Arc<dyn PaymentGateway>,
        runner: EffectRunner,
        clock: Arc<dyn Clock>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            env: TicketEnvironment::new(Arc::clone(&clock)),
            store,
            estimator,
            gateway,
            runner,
            clock,
            gateway_timeout,
            reducer: TicketReducer::new(),
        }
    }

    /// Shared store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Shared effect runner
    #[must_use]
    pub const fn runner(&self) -> &EffectRunner {
        &self.runner
    }

    /// Shared clock
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Shared payment gateway
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    /// Book a ticket.
    ///
    /// A reference that was already booked returns the existing ticket
    /// without consuming quota. Otherwise admission is consumed, a number
    /// allocated and the ticket stored; if any later step fails, the slot
    /// and the admission are handed back.
    ///
    /// # Errors
    ///
    /// - [`DomainError::AdmissionDenied`] at the plan limit
    /// - [`DomainError::QueueNotAcceptingTickets`] for a paused or closed queue,
    ///   including one closed while the booking was in flight (the stored
    ///   ticket is then cancelled)
    /// - [`EngineError::NotFound`] when the business has no open queue
    #[tracing::instrument(skip(self, request), fields(business_id = %request.business_id))]
    pub async fn book(&self, request: BookingRequest) -> Result<BookingOutcome> {
        let reference = request
            .booking_reference
            .clone()
            .unwrap_or_else(BookingReference::generate);

        if let Some(existing) = self.store.find_by_reference(&reference).await? {
            if existing.business_id != request.business_id {
                return Err(DomainError::InvalidBooking(format!(
                    "reference {reference} belongs to another business"
                ))
                .into());
            }
            tracing::info!(ticket_id = %existing.id, %reference, "Booking replayed");
            return Ok(BookingOutcome {
                ticket: existing,
                checkout: None,
                replayed: true,
            });
        }

        let queue = self.resolve_queue(&request).await?;
        if !queue.is_accepting() {
            return Err(DomainError::QueueNotAcceptingTickets {
                queue_id: queue.id,
                status: queue.status,
            }
            .into());
        }

        let admitted_at = self.clock.now();
        let admission = match self
            .store
            .consume_admission(request.business_id, admitted_at)
            .await
        {
            Ok(decision) => decision,
            Err(StoreError::Domain(e @ DomainError::AdmissionDenied { .. })) => {
                metrics::record_admission_denied();
                tracing::info!(error = %e, "Admission denied");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let number = match self.store.allocate_number(queue.id).await {
            Ok(number) => number,
            Err(e) => {
                self.release_admission(request.business_id, admitted_at).await;
                return Err(e.into());
            }
        };

        let prepared = self.prepare_ticket(&request, &queue, reference, number).await;
        let (ticket, effects) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.compensate(&queue, admitted_at).await;
                return Err(e);
            }
        };

        match self.store.insert_ticket(&ticket).await {
            Ok(()) => {}
            Err(StoreError::Conflict(msg)) => {
                // Same reference booked concurrently: hand back ours, replay theirs
                self.compensate(&queue, admitted_at).await;
                return match self.store.find_by_reference(&ticket.booking_reference).await? {
                    Some(existing) if existing.business_id == request.business_id => {
                        tracing::info!(ticket_id = %existing.id, reference = %existing.booking_reference, "Concurrent booking replayed");
                        Ok(BookingOutcome {
                            ticket: existing,
                            checkout: None,
                            replayed: true,
                        })
                    }
                    _ => Err(StoreError::Conflict(msg).into()),
                };
            }
            Err(e) => {
                tracing::warn!(queue_id = %queue.id, %number, error = %e, "Ticket insert failed; releasing slot and admission");
                self.compensate(&queue, admitted_at).await;
                return Err(e.into());
            }
        }

        if self.closed_during_booking(&ticket).await? {
            return Err(DomainError::QueueNotAcceptingTickets {
                queue_id: queue.id,
                status: QueueStatus::Closed,
            }
            .into());
        }

        tracing::info!(
            ticket_id = %ticket.id,
            queue_id = %queue.id,
            number = %ticket.number,
            status = %ticket.status,
            remaining = admission.remaining,
            capacity = queue.capacity.get(),
            "Ticket booked"
        );
        metrics::record_ticket(ticket.status);

        let checkout = if ticket.status == TicketStatus::PendingPayment {
            self.open_checkout(&ticket).await
        } else {
            None
        };

        self.runner.run(effects).await;
        if ticket.status == TicketStatus::Waiting {
            self.refresh_positions(queue.id).await;
        }

        Ok(BookingOutcome {
            ticket,
            checkout,
            replayed: false,
        })
    }

    /// Create (or recreate) the hosted checkout for a ticket awaiting payment.
    ///
    /// # Errors
    ///
    /// Returns error if the ticket is unknown, not awaiting payment, or the
    /// gateway fails.
    pub async fn checkout(&self, ticket_id: TicketId) -> Result<CheckoutSession> {
        let ticket = self.get_ticket(ticket_id).await?;
        if ticket.status != TicketStatus::PendingPayment {
            return Err(DomainError::InvalidBooking(format!(
                "ticket {ticket_id} is not awaiting payment"
            ))
            .into());
        }
        self.create_checkout(&ticket).await
    }

    async fn open_checkout(&self, ticket: &Ticket) -> Option<CheckoutSession> {
        match self.create_checkout(ticket).await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::error!(ticket_id = %ticket.id, error = %e, "Checkout session creation failed");
                None
            }
        }
    }

    async fn create_checkout(&self, ticket: &Ticket) -> Result<CheckoutSession> {
        let request = CheckoutRequest {
            reference: ticket.booking_reference.clone(),
            ticket_id: ticket.id,
            amount: ticket.price,
            description: format!("Queue ticket #{} ({:?})", ticket.number, ticket.service_type),
        };
        self.within_gateway_timeout(self.gateway.create_checkout_session(&request))
            .await
    }

    /// Bound a gateway call by the configured timeout
    pub(crate) async fn within_gateway_timeout<T>(
        &self,
        call: impl std::future::Future<Output = std::result::Result<T, PaymentGatewayError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PaymentGatewayError::Timeout.into()),
        }
    }

    async fn resolve_queue(&self, request: &BookingRequest) -> Result<Queue> {
        let queue = match request.queue_id {
            Some(id) => self.store.get_queue(id).await?,
            None => self.store.current_queue(request.business_id).await?,
        };
        let queue = queue.ok_or(EngineError::NotFound("queue"))?;
        if queue.business_id != request.business_id {
            return Err(EngineError::NotFound("queue"));
        }
        Ok(queue)
    }

    async fn release_admission(&self, business_id: BusinessId, admitted_at: DateTime<Utc>) {
        if let Err(e) = self.store.release_admission(business_id, admitted_at).await {
            tracing::warn!(%business_id, error = %e, "Failed to release admission");
        }
    }

    /// Run the booking through the reducer and attach the arrival estimate
    async fn prepare_ticket(
        &self,
        request: &BookingRequest,
        queue: &Queue,
        reference: BookingReference,
        number: TicketNumber,
    ) -> Result<(Ticket, Effects)> {
        let mut state = None;
        let effects = self.reducer.reduce(
            &mut state,
            TicketAction::Book(NewTicket {
                id: TicketId::new(),
                queue_id: queue.id,
                business_id: request.business_id,
                customer_id: request.customer_id,
                booking_reference: reference,
                number,
                service_type: request.service_type,
                priority: request.priority,
                payment_method: request.payment_method,
                price: request.price,
            }),
            &self.env,
        )?;

        let ahead = self.waiting_count(queue.id).await;
        let estimate = self
            .estimator
            .estimate(request.business_id, request.service_type, ahead)
            .await;
        let minutes = estimate.estimated_minutes;
        self.reducer.reduce(
            &mut state,
            TicketAction::AttachEstimate {
                minutes,
                expected_at: self.clock.now() + ChronoDuration::minutes(i64::from(minutes)),
            },
            &self.env,
        )?;

        let ticket = state.ok_or(EngineError::NotFound("ticket"))?;
        Ok((ticket, effects))
    }

    /// Cancel a ticket inserted after its queue's close sweep already ran.
    ///
    /// Returns `true` when the queue turned out to be closed.
    async fn closed_during_booking(&self, ticket: &Ticket) -> Result<bool> {
        let closed = self
            .store
            .get_queue(ticket.queue_id)
            .await?
            .is_none_or(|q| q.status == QueueStatus::Closed);
        if !closed {
            return Ok(false);
        }

        tracing::warn!(ticket_id = %ticket.id, queue_id = %ticket.queue_id, "Queue closed during booking; cancelling ticket");
        self.apply(
            ticket.id,
            TicketAction::Cancel {
                actor: CancellationActor::System,
                reason: Some(QUEUE_CLOSED_REASON.to_string()),
            },
        )
        .await?;
        Ok(true)
    }

    /// Hand back the slot and admission taken by a failed booking
    async fn compensate(&self, queue: &Queue, admitted_at: DateTime<Utc>) {
        if let Err(e) = self.store.release_slot(queue.id).await {
            tracing::warn!(queue_id = %queue.id, error = %e, "Failed to release slot");
        }
        self.release_admission(queue.business_id, admitted_at).await;
    }

    async fn waiting_count(&self, queue_id: QueueId) -> u32 {
        match self
            .store
            .queue_tickets(queue_id, &[TicketStatus::Waiting])
            .await
        {
            Ok(waiting) => u32::try_from(waiting.len()).unwrap_or(u32::MAX),
            Err(e) => {
                tracing::warn!(%queue_id, error = %e, "Waiting count unavailable");
                0
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Apply a lifecycle action to a stored ticket.
    ///
    /// The stored ticket is reloaded and the action replayed when a
    /// concurrent writer changed it in between.
    pub(crate) async fn apply(&self, ticket_id: TicketId, action: TicketAction) -> Result<Ticket> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.get_ticket(ticket_id).await?;
            let mut state = Some(current.clone());

            let effects = match self.reducer.reduce(&mut state, action.clone(), &self.env) {
                Ok(effects) => effects,
                Err(e) => {
                    tracing::info!(%ticket_id, status = %current.status, error = %e, "Transition rejected");
                    return Err(e.into());
                }
            };
            let Some(updated) = state else {
                return Err(EngineError::NotFound("ticket"));
            };
            if updated == current {
                return Ok(updated);
            }

            match self
                .store
                .update_ticket(&updated, current.status, current.payment_status)
                .await
            {
                Ok(()) => {}
                Err(StoreError::Conflict(msg)) if attempt < CAS_ATTEMPTS => {
                    tracing::debug!(%ticket_id, attempt, %msg, "Ticket changed concurrently; retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            self.after_transition(&current, &updated).await;
            self.runner.run(effects).await;
            if Self::changes_waiting_set(&current, &updated) {
                self.refresh_positions(updated.queue_id).await;
            }
            return Ok(updated);
        }
    }

    async fn after_transition(&self, before: &Ticket, after: &Ticket) {
        if before.status != after.status {
            tracing::info!(
                ticket_id = %after.id,
                queue_id = %after.queue_id,
                business_id = %after.business_id,
                from = %before.status,
                to = %after.status,
                "Ticket transitioned"
            );
            metrics::record_ticket(after.status);
        }

        let released = matches!(after.status, TicketStatus::Completed | TicketStatus::Cancelled)
            && before.status != after.status;
        if released {
            if let Err(e) = self.store.release_slot(after.queue_id).await {
                tracing::warn!(queue_id = %after.queue_id, error = %e, "Failed to release slot");
            }
        }

        if after.status == TicketStatus::Completed {
            if let Some(minutes) = after.service_duration_minutes() {
                metrics::record_service_duration(minutes);
            }
        }
    }

    fn changes_waiting_set(before: &Ticket, after: &Ticket) -> bool {
        (before.status == TicketStatus::Waiting) != (after.status == TicketStatus::Waiting)
    }

    /// Call the lowest-numbered waiting ticket of a queue.
    ///
    /// Returns `None` when nobody is waiting. A candidate taken by a
    /// concurrent call is skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the queue is unknown or the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn call_next(&self, queue_id: QueueId) -> Result<Option<Ticket>> {
        self.store
            .get_queue(queue_id)
            .await?
            .ok_or(EngineError::NotFound("queue"))?;

        let waiting = self
            .store
            .queue_tickets(queue_id, &[TicketStatus::Waiting])
            .await?;
        for candidate in waiting {
            match self.apply(candidate.id, TicketAction::Call).await {
                Ok(ticket) => return Ok(Some(ticket)),
                Err(EngineError::Domain(DomainError::InvalidTicketTransition { .. }))
                | Err(EngineError::Conflict(_)) => {
                    tracing::debug!(ticket_id = %candidate.id, "Candidate taken; trying next");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Call a specific waiting ticket.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTicketTransition`] unless the ticket is waiting.
    pub async fn call(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.apply(ticket_id, TicketAction::Call).await
    }

    /// Start serving a called ticket.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTicketTransition`] unless the ticket is called.
    pub async fn serve(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.apply(ticket_id, TicketAction::Serve).await
    }

    /// Finish serving a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTicketTransition`] unless the ticket is in progress.
    pub async fn complete(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.apply(ticket_id, TicketAction::Complete).await
    }

    /// Record a no-show.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTicketTransition`] unless the ticket is waiting or called.
    pub async fn mark_missed(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.apply(ticket_id, TicketAction::MarkMissed).await
    }

    /// Put a missed ticket back in line (it keeps its original number).
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTicketTransition`] unless the ticket is missed.
    pub async fn reactivate(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.apply(ticket_id, TicketAction::Reactivate).await
    }

    /// Cancel a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTicketTransition`] for terminal or missed tickets.
    pub async fn cancel(
        &self,
        ticket_id: TicketId,
        actor: CancellationActor,
        reason: Option<String>,
    ) -> Result<Ticket> {
        self.apply(ticket_id, TicketAction::Cancel { actor, reason })
            .await
    }

    /// Hard-delete a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown ticket.
    pub async fn remove(&self, ticket_id: TicketId) -> Result<()> {
        let ticket = self.get_ticket(ticket_id).await?;
        if !self.store.delete_ticket(ticket_id).await? {
            return Err(EngineError::NotFound("ticket"));
        }
        if !ticket.status.is_terminal() {
            if let Err(e) = self.store.release_slot(ticket.queue_id).await {
                tracing::warn!(queue_id = %ticket.queue_id, error = %e, "Failed to release slot");
            }
        }
        tracing::info!(%ticket_id, queue_id = %ticket.queue_id, "Ticket removed");
        self.refresh_positions(ticket.queue_id).await;
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Load a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown ticket.
    pub async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.store
            .get_ticket(ticket_id)
            .await?
            .ok_or(EngineError::NotFound("ticket"))
    }

    /// A customer's tickets, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn customer_tickets(&self, customer_id: CustomerId) -> Result<Vec<Ticket>> {
        Ok(self.store.customer_tickets(customer_id).await?)
    }

    /// Dashboard snapshot of a business's open queue.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn queue_snapshot(&self, business_id: BusinessId) -> Result<QueueSnapshot> {
        let Some(queue) = self.store.current_queue(business_id).await? else {
            return Ok(QueueSnapshot {
                status: "not_started".to_string(),
                queue: None,
                now_serving: None,
                waiting: Vec::new(),
                pending_payment: 0,
                in_service: 0,
                missed: 0,
            });
        };

        let tickets = self
            .store
            .queue_tickets(
                queue.id,
                &[
                    TicketStatus::PendingPayment,
                    TicketStatus::Waiting,
                    TicketStatus::Called,
                    TicketStatus::InProgress,
                    TicketStatus::Missed,
                ],
            )
            .await?;

        let count = |status: TicketStatus| tickets.iter().filter(|t| t.status == status).count();
        let now_serving = tickets
            .iter()
            .filter(|t| matches!(t.status, TicketStatus::Called | TicketStatus::InProgress))
            .max_by_key(|t| t.called_at)
            .map(|t| t.number);
        let waiting = tickets
            .iter()
            .filter(|t| t.status == TicketStatus::Waiting)
            .zip(1u32..)
            .map(|(t, position)| TicketPosition {
                ticket_id: t.id,
                number: t.number,
                position,
                estimated_wait_minutes: t.estimated_wait_minutes.unwrap_or(0),
            })
            .collect();

        Ok(QueueSnapshot {
            status: queue.status.to_string(),
            now_serving,
            waiting,
            pending_payment: count(TicketStatus::PendingPayment),
            in_service: count(TicketStatus::Called) + count(TicketStatus::InProgress),
            missed: count(TicketStatus::Missed),
            queue: Some(queue),
        })
    }

    /// Estimate the wait for a new arrival at a business.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when no queue is open.
    pub async fn estimate_arrival(
        &self,
        business_id: BusinessId,
        service_type: ServiceType,
    ) -> Result<Estimate> {
        let queue = self
            .store
            .current_queue(business_id)
            .await?
            .ok_or(EngineError::NotFound("queue"))?;
        let ahead = self.waiting_count(queue.id).await;
        Ok(self.estimator.estimate(business_id, service_type, ahead).await)
    }

    /// Recompute per-position estimates for a queue's waiting tickets and
    /// broadcast them. Failures are logged and absorbed.
    pub async fn refresh_positions(&self, queue_id: QueueId) {
        if let Err(e) = self.try_refresh_positions(queue_id).await {
            tracing::warn!(%queue_id, error = %e, "Position refresh failed");
        }
    }

    async fn try_refresh_positions(&self, queue_id: QueueId) -> Result<()> {
        let queue = self
            .store
            .get_queue(queue_id)
            .await?
            .ok_or(EngineError::NotFound("queue"))?;
        let waiting = self
            .store
            .queue_tickets(queue_id, &[TicketStatus::Waiting])
            .await?;

        let count = u32::try_from(waiting.len()).unwrap_or(u32::MAX);
        let total = if count == 0 {
            0
        } else {
            self.estimator
                .estimate(queue.business_id, ServiceType::Other, count)
                .await
                .estimated_minutes
        };

        let now = self.clock.now();
        let mut positions = Vec::with_capacity(waiting.len());
        for (ticket, position) in waiting.iter().zip(1u32..) {
            let minutes = position_eta(total, count, position);
            let expected_at = now + ChronoDuration::minutes(i64::from(minutes));
            self.store
                .update_estimate(ticket.id, minutes, expected_at)
                .await?;
            positions.push(TicketPosition {
                ticket_id: ticket.id,
                number: ticket.number,
                position,
                estimated_wait_minutes: minutes,
            });
        }

        tracing::debug!(%queue_id, waiting = count, total_minutes = total, "Positions refreshed");
        self.runner
            .run(effects([Effect::publish(
                Room::Business(queue.business_id),
                QueueEvent::QueueUpdated { queue, positions },
            )]))
            .await;
        Ok(())
    }
}
