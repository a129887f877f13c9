//! Payment endpoints.
//!
//! - `POST /api/payments/webhook` - Signed gateway notification
//! - `POST /api/payments/sessions/:session_id/confirm` - Customer returned from checkout
//! - `POST /api/staff/tickets/:id/refund` - Refund a cancelled, paid ticket
//!
//! The webhook must see the raw request body: the signature covers the exact
//! bytes the gateway sent.

use super::error::AppError;
use crate::reconciler::{Settlement, WebhookOutcome};
use crate::server::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Serialize;
use uuid::Uuid;
use waitline_core::types::{Ticket, TicketId};

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Webhook acknowledgement
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always `true`; failures are reported with an error status
    pub received: bool,
    /// Settlement result, absent for ignored event types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
}

/// Gateway webhook
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::error!("Webhook without signature header");
            AppError::bad_request("Missing stripe-signature header")
        })?;

    let outcome = state.reconciler.handle_webhook(&body, signature).await?;
    let settlement = match outcome {
        WebhookOutcome::Settled(settlement) => Some(settlement),
        WebhookOutcome::Ignored(_) => None,
    };
    Ok(Json(WebhookResponse {
        received: true,
        settlement,
    }))
}

/// Confirm a checkout session the customer just completed
pub async fn confirm_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Settlement>, AppError> {
    Ok(Json(state.reconciler.confirm_session(&session_id).await?))
}

/// Refund a cancelled, paid ticket
pub async fn refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.reconciler.refund(TicketId::from_uuid(id)).await?))
}
