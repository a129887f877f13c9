//! Business directory relay.
//!
//! - `POST /api/internal/business-events` - Relay a directory change
//!
//! The business directory lives in another service. It posts its changes
//! here so connected clients see them; each event goes to the global room
//! and to the business's own room.

use super::error::AppError;
use crate::server::state::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waitline_core::events::{QueueEvent, Room};
use waitline_core::types::BusinessId;

/// Kind of directory change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessChange {
    /// New business listed
    Created,
    /// Listing edited
    Updated,
    /// Listing removed
    Deleted,
}

/// Relay request body
#[derive(Debug, Deserialize)]
pub struct BusinessEventRequest {
    /// What happened
    pub change: BusinessChange,
    /// Business affected
    pub business_id: Uuid,
    /// Listing as the directory serializes it
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Relay acknowledgement
#[derive(Debug, Serialize)]
pub struct RelayResponse {
    /// Event name sent to clients
    pub event: &'static str,
    /// Connections the event reached
    pub delivered: usize,
}

/// Relay a business directory change to connected clients
pub async fn relay_business_event(
    State(state): State<AppState>,
    Json(body): Json<BusinessEventRequest>,
) -> Result<Json<RelayResponse>, AppError> {
    let business_id = BusinessId::from_uuid(body.business_id);
    let event = match body.change {
        BusinessChange::Created => QueueEvent::BusinessCreated {
            business_id,
            payload: body.payload,
        },
        BusinessChange::Updated => QueueEvent::BusinessUpdated {
            business_id,
            payload: body.payload,
        },
        BusinessChange::Deleted => QueueEvent::BusinessDeleted { business_id },
    };
    let name = event.name();

    let mut delivered = state
        .broadcaster
        .publish(&Room::Business(business_id), event.clone())
        .await;
    delivered += state.broadcaster.publish(&Room::Global, event).await;

    tracing::debug!(%business_id, event = name, delivered, "Business event relayed");
    Ok(Json(RelayResponse {
        event: name,
        delivered,
    }))
}
