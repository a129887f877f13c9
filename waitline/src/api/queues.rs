//! Queue, dashboard, estimate and plan endpoints.
//!
//! - `GET /api/businesses/:business_id/queue` - Live dashboard
//! - `GET /api/businesses/:business_id/eta?service_type=` - Wait for a new arrival
//! - `POST /api/staff/businesses/:business_id/queue` - Open today's queue
//! - `POST /api/staff/queues/:id/{pause,resume,close,call-next}`
//! - `GET /api/staff/businesses/:business_id/admission` - Quota check
//! - `PUT /api/staff/businesses/:business_id/plan` - Change plan

use super::error::AppError;
use crate::engine::QueueSnapshot;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;
use waitline_core::eta::Estimate;
use waitline_core::subscription::{AdmissionDecision, PlanTier, Subscription};
use waitline_core::types::{BusinessId, Queue, QueueId, ServiceType};

/// Open-queue request body
#[derive(Debug, Default, Deserialize)]
pub struct OpenQueueRequest {
    /// Advisory capacity; defaults to the configured value
    pub capacity: Option<u32>,
}

/// Query for the arrival estimate
#[derive(Debug, Deserialize)]
pub struct EtaQuery {
    /// Service the arrival would book
    pub service_type: Option<ServiceType>,
}

/// Plan change body
#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    /// New plan
    pub plan: PlanTier,
}

/// Live dashboard for a business
pub async fn dashboard(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> Result<Json<QueueSnapshot>, AppError> {
    let snapshot = state
        .engine
        .queue_snapshot(BusinessId::from_uuid(business_id))
        .await?;
    Ok(Json(snapshot))
}

/// Estimated wait for someone joining now
pub async fn arrival_estimate(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
    Query(query): Query<EtaQuery>,
) -> Result<Json<Estimate>, AppError> {
    let estimate = state
        .engine
        .estimate_arrival(
            BusinessId::from_uuid(business_id),
            query.service_type.unwrap_or(ServiceType::Other),
        )
        .await?;
    Ok(Json(estimate))
}

/// Open (or return) the business's queue
pub async fn open_queue(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
    body: Option<Json<OpenQueueRequest>>,
) -> Result<(StatusCode, Json<Queue>), AppError> {
    let capacity = body.and_then(|Json(b)| b.capacity);
    let queue = state
        .register
        .open(BusinessId::from_uuid(business_id), capacity)
        .await?;
    Ok((StatusCode::CREATED, Json(queue)))
}

/// Stop accepting bookings
pub async fn pause_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Queue>, AppError> {
    Ok(Json(state.register.pause(QueueId::from_uuid(id)).await?))
}

/// Accept bookings again
pub async fn resume_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Queue>, AppError> {
    Ok(Json(state.register.resume(QueueId::from_uuid(id)).await?))
}

/// Close the queue, cancelling open tickets
pub async fn close_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Queue>, AppError> {
    Ok(Json(state.register.close(QueueId::from_uuid(id)).await?))
}

/// Call the lowest-numbered waiting ticket; 204 when nobody is waiting
pub async fn call_next(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(match state.engine.call_next(QueueId::from_uuid(id)).await? {
        Some(ticket) => Json(ticket).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Whether another booking would be admitted
pub async fn admission_check(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> Result<Json<AdmissionDecision>, AppError> {
    Ok(Json(
        state
            .admission
            .check(BusinessId::from_uuid(business_id))
            .await?,
    ))
}

/// Change the business's subscription plan
pub async fn set_plan(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
    Json(body): Json<SetPlanRequest>,
) -> Result<Json<Subscription>, AppError> {
    Ok(Json(
        state
            .admission
            .set_plan(BusinessId::from_uuid(business_id), body.plan)
            .await?,
    ))
}
