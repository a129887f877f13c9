//! `GET /api/me/notifications` - the signed-in customer's in-app notifications.

use super::error::AppError;
use super::identity::Customer;
use crate::server::state::AppState;
use axum::{Json, extract::State};
use waitline_core::events::Notification;

/// List notifications, oldest first
pub async fn my_notifications(
    State(state): State<AppState>,
    Customer(customer_id): Customer,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(state.notifications.list(customer_id).await))
}
