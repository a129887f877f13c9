//! Booking and ticket endpoints.
//!
//! Customer-facing:
//! - `POST /api/bookings` - Book a ticket (guest or signed-in)
//! - `GET /api/tickets/:id` - Ticket status
//! - `GET /api/me/tickets` - Signed-in customer's tickets
//! - `POST /api/tickets/:id/cancel` - Cancel own ticket
//! - `POST /api/tickets/:id/checkout` - Recreate the hosted checkout
//!
//! Staff (authorized upstream):
//! - `POST /api/staff/tickets/:id/{call,serve,complete,missed,reactivate,cancel}`
//! - `DELETE /api/staff/tickets/:id`
//!
//! # Booking flow
//!
//! Cash and free tickets join the line immediately. Online tickets with a
//! price wait in `pending_payment` and the response carries the hosted
//! checkout URL; the ticket joins the line once the gateway confirms.

use super::error::AppError;
use super::identity::{Caller, Customer};
use crate::engine::{BookingOutcome, BookingRequest};
use crate::payment_gateway::CheckoutSession;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;
use waitline_core::types::{
    BookingReference, BusinessId, CancellationActor, Money, PaymentMethod, Priority, QueueId,
    ServiceType, Ticket, TicketId,
};

/// Booking request body
#[derive(Debug, Deserialize)]
pub struct BookTicketRequest {
    /// Business to join
    pub business_id: Uuid,
    /// Specific queue (defaults to the business's open queue)
    pub queue_id: Option<Uuid>,
    /// Service booked
    pub service_type: ServiceType,
    /// `cash` or `online`
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Price in cents
    #[serde(default)]
    pub price: Money,
    /// Idempotency key; retries with the same key return the same ticket
    pub booking_reference: Option<String>,
    /// Priority tier
    #[serde(default)]
    pub priority: Priority,
}

/// Cancellation request body
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Free-text reason
    pub reason: Option<String>,
}

/// Book a ticket.
///
/// Returns 201 for a new ticket and 200 when the booking reference had
/// already been used.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/bookings \
///   -H "Content-Type: application/json" \
///   -d '{"business_id":"…","service_type":"consultation","payment_method":"cash"}'
/// ```
pub async fn book_ticket(
    State(state): State<AppState>,
    Caller(customer_id): Caller,
    Json(body): Json<BookTicketRequest>,
) -> Result<(StatusCode, Json<BookingOutcome>), AppError> {
    let booking_reference = match body.booking_reference {
        Some(reference) if reference.trim().is_empty() => {
            return Err(AppError::bad_request("booking_reference must not be empty"));
        }
        Some(reference) => Some(BookingReference::new(reference.trim())),
        None => None,
    };

    let outcome = state
        .engine
        .book(BookingRequest {
            business_id: BusinessId::from_uuid(body.business_id),
            queue_id: body.queue_id.map(QueueId::from_uuid),
            customer_id,
            service_type: body.service_type,
            payment_method: body.payment_method,
            price: body.price,
            booking_reference,
            priority: body.priority,
        })
        .await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// Ticket status
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.get_ticket(TicketId::from_uuid(id)).await?))
}

/// The signed-in customer's tickets, newest first
pub async fn my_tickets(
    State(state): State<AppState>,
    Customer(customer_id): Customer,
) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.engine.customer_tickets(customer_id).await?))
}

async fn owned_ticket(
    state: &AppState,
    customer: Customer,
    id: Uuid,
) -> Result<Ticket, AppError> {
    let ticket = state.engine.get_ticket(TicketId::from_uuid(id)).await?;
    if ticket.customer_id != Some(customer.0) {
        return Err(AppError::forbidden("Not your ticket"));
    }
    Ok(ticket)
}

/// Cancel the caller's own ticket
pub async fn cancel_own_ticket(
    State(state): State<AppState>,
    customer: Customer,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = owned_ticket(&state, customer, id).await?;
    let reason = body.and_then(|Json(b)| b.reason);
    let cancelled = state
        .engine
        .cancel(ticket.id, CancellationActor::Customer(customer.0), reason)
        .await?;
    Ok(Json(cancelled))
}

/// Recreate the hosted checkout for the caller's pending ticket
pub async fn checkout(
    State(state): State<AppState>,
    customer: Customer,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckoutSession>, AppError> {
    let ticket = owned_ticket(&state, customer, id).await?;
    Ok(Json(state.engine.checkout(ticket.id).await?))
}

// ============================================================================
// Staff transitions
// ============================================================================

/// Call a specific waiting ticket
pub async fn call_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.call(TicketId::from_uuid(id)).await?))
}

/// Start service
pub async fn serve_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.serve(TicketId::from_uuid(id)).await?))
}

/// Finish service
pub async fn complete_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.complete(TicketId::from_uuid(id)).await?))
}

/// Customer did not show up
pub async fn mark_missed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.mark_missed(TicketId::from_uuid(id)).await?))
}

/// Put a missed ticket back in line (keeps its number)
pub async fn reactivate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.reactivate(TicketId::from_uuid(id)).await?))
}

/// Staff cancellation
pub async fn staff_cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Ticket>, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let ticket = state
        .engine
        .cancel(TicketId::from_uuid(id), CancellationActor::Staff, reason)
        .await?;
    Ok(Json(ticket))
}

/// Hard-delete a ticket
pub async fn remove_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.engine.remove(TicketId::from_uuid(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
