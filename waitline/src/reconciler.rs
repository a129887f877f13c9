//! Payment Reconciler.
//!
//! Gateway webhooks and the customer's "confirm my session" call both end
//! in [`PaymentReconciler::settle`], which is idempotent: the transaction id
//! is recorded under a unique constraint before the ticket is touched, so a
//! redelivered notification changes nothing.

use crate::engine::{EngineError, LifecycleEngine, Result};
use crate::metrics;
use crate::payment_gateway::{GatewayEvent, PaymentGatewayError};
use serde::Serialize;
use waitline_core::DomainError;
use waitline_core::ticket::TicketAction;
use waitline_core::types::{
    BookingReference, Money, PaymentId, PaymentRecord, PaymentRecordStatus, PaymentStatus,
    Ticket, TicketId, TicketStatus,
};

/// How a settlement request was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "ticket", rename_all = "snake_case")]
pub enum Settlement {
    /// Payment recorded and the ticket marked paid
    Settled(Ticket),
    /// Ticket was already paid; nothing changed
    AlreadyPaid(Ticket),
    /// Transaction id seen before; nothing changed
    Duplicate(Ticket),
}

impl Settlement {
    /// The ticket in its current state
    #[must_use]
    pub const fn ticket(&self) -> &Ticket {
        match self {
            Self::Settled(t) | Self::AlreadyPaid(t) | Self::Duplicate(t) => t,
        }
    }
}

/// Result of handling a webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A checkout completion was settled
    Settled(Settlement),
    /// An event type this service does not act on
    Ignored(String),
}

/// Reconciles gateway payments with tickets
#[derive(Clone)]
pub struct PaymentReconciler {
    engine: LifecycleEngine,
}

impl PaymentReconciler {
    /// Create a reconciler
    #[must_use]
    pub const fn new(engine: LifecycleEngine) -> Self {
        Self { engine }
    }

    /// Verify and apply a signed gateway webhook.
    ///
    /// # Errors
    ///
    /// - [`DomainError::GatewayVerificationFailed`] for a bad signature, a
    ///   stale timestamp or an unreadable body; nothing is mutated
    /// - [`EngineError::NotFound`] when no ticket carries the reference
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome> {
        let now = self.engine.clock().now();
        let event = match self.engine.gateway().verify_webhook(payload, signature, now) {
            Ok(event) => event,
            Err(e @ (PaymentGatewayError::Verification(_) | PaymentGatewayError::Malformed(_))) => {
                tracing::error!(error = %e, "Webhook rejected");
                metrics::record_payment("failed");
                return Err(DomainError::GatewayVerificationFailed(e.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };

        match event {
            GatewayEvent::CheckoutCompleted {
                reference,
                transaction_id,
                amount,
            } => Ok(WebhookOutcome::Settled(
                self.settle(&reference, &transaction_id, amount).await?,
            )),
            GatewayEvent::Ignored(kind) => {
                tracing::debug!(event_type = %kind, "Webhook event ignored");
                Ok(WebhookOutcome::Ignored(kind))
            }
        }
    }

    /// Confirm a checkout session synchronously (customer returned from the
    /// hosted page before the webhook arrived).
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidBooking`] while the session is unpaid,
    /// or a gateway error if the session cannot be retrieved.
    pub async fn confirm_session(&self, session_id: &str) -> Result<Settlement> {
        let status = self
            .engine
            .within_gateway_timeout(self.engine.gateway().retrieve_session(session_id))
            .await?;
        if !status.paid {
            return Err(DomainError::InvalidBooking(format!(
                "checkout session {session_id} is not paid"
            ))
            .into());
        }
        let transaction_id = status
            .transaction_id
            .unwrap_or_else(|| status.session_id.clone());
        self.settle(&status.reference, &transaction_id, status.amount)
            .await
    }

    /// Record a gateway payment against the ticket booked under `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown reference (nothing is
    /// recorded), or a store error.
    #[tracing::instrument(skip(self, amount), fields(amount = amount.cents()))]
    pub async fn settle(
        &self,
        reference: &BookingReference,
        transaction_id: &str,
        amount: Money,
    ) -> Result<Settlement> {
        let store = self.engine.store();
        let ticket = store
            .find_by_reference(reference)
            .await?
            .ok_or(EngineError::NotFound("ticket"))?;

        if ticket.payment_status != PaymentStatus::Unpaid {
            tracing::info!(ticket_id = %ticket.id, "Payment already settled");
            metrics::record_payment("duplicate");
            return Ok(Settlement::AlreadyPaid(ticket));
        }
        if amount != ticket.price {
            tracing::warn!(
                ticket_id = %ticket.id,
                expected = ticket.price.cents(),
                "Paid amount differs from ticket price"
            );
        }

        let record = PaymentRecord {
            id: PaymentId::new(),
            ticket_id: ticket.id,
            business_id: ticket.business_id,
            payer: ticket.customer_id,
            amount,
            transaction_id: transaction_id.to_string(),
            status: PaymentRecordStatus::Completed,
            created_at: self.engine.clock().now(),
        };
        if !store.insert_payment(&record).await? {
            let recorded_here = store
                .payments_for_ticket(ticket.id)
                .await?
                .iter()
                .any(|p| p.transaction_id == transaction_id);
            if !recorded_here {
                let duplicate =
                    DomainError::DuplicatePaymentNotification(transaction_id.to_string());
                tracing::info!(ticket_id = %ticket.id, reason = %duplicate, "Duplicate notification ignored");
                metrics::record_payment("duplicate");
                return Ok(Settlement::Duplicate(ticket));
            }

            // Recorded by an earlier delivery that did not finish the ticket
            let current = self.engine.get_ticket(ticket.id).await?;
            if current.payment_status != PaymentStatus::Unpaid {
                metrics::record_payment("duplicate");
                return Ok(Settlement::AlreadyPaid(current));
            }
            tracing::warn!(ticket_id = %ticket.id, %transaction_id, "Resuming unfinished settlement");
        }

        if ticket.status == TicketStatus::Cancelled {
            tracing::warn!(ticket_id = %ticket.id, "Payment received for a cancelled ticket");
        }
        let settled = self
            .engine
            .apply(ticket.id, TicketAction::ConfirmPayment)
            .await?;
        metrics::record_payment("confirmed");
        tracing::info!(ticket_id = %settled.id, status = %settled.status, "Payment settled");
        Ok(Settlement::Settled(settled))
    }

    /// Refund a cancelled, paid ticket through the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotRefundable`] unless the ticket is cancelled
    /// and paid with a completed gateway payment, or a gateway error.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, ticket_id: TicketId) -> Result<Ticket> {
        let ticket = self.engine.get_ticket(ticket_id).await?;
        if ticket.status != TicketStatus::Cancelled || ticket.payment_status != PaymentStatus::Paid {
            return Err(DomainError::NotRefundable(format!(
                "ticket is {} and {:?}",
                ticket.status, ticket.payment_status
            ))
            .into());
        }

        let store = self.engine.store();
        let payment = store
            .payments_for_ticket(ticket_id)
            .await?
            .into_iter()
            .find(|p| p.status == PaymentRecordStatus::Completed)
            .ok_or_else(|| DomainError::NotRefundable("no completed payment".into()))?;

        let refund_id = self
            .engine
            .within_gateway_timeout(
                self.engine
                    .gateway()
                    .refund(&payment.transaction_id, payment.amount),
            )
            .await?;
        store
            .set_payment_status(payment.id, PaymentRecordStatus::Refunded)
            .await?;
        let refunded = self.engine.apply(ticket_id, TicketAction::RecordRefund).await?;

        metrics::record_payment("refunded");
        tracing::info!(%ticket_id, %refund_id, amount = payment.amount.cents(), "Ticket refunded");
        Ok(refunded)
    }
}
