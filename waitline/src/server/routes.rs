//! Router configuration.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::{bookings, events, notifications, payments, queues, websocket};
use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// Staff and internal routes sit under `/api/staff` and `/api/internal`;
/// the fronting gateway restricts who may reach them.
pub fn build_router(state: AppState) -> Router {
    let customer = Router::new()
        .route("/bookings", post(bookings::book_ticket))
        .route("/tickets/:id", get(bookings::get_ticket))
        .route("/tickets/:id/cancel", post(bookings::cancel_own_ticket))
        .route("/tickets/:id/checkout", post(bookings::checkout))
        .route("/me/tickets", get(bookings::my_tickets))
        .route("/me/notifications", get(notifications::my_notifications))
        .route("/businesses/:business_id/queue", get(queues::dashboard))
        .route("/businesses/:business_id/eta", get(queues::arrival_estimate))
        .route("/payments/webhook", post(payments::webhook))
        .route(
            "/payments/sessions/:session_id/confirm",
            post(payments::confirm_session),
        );

    let staff = Router::new()
        .route("/businesses/:business_id/queue", post(queues::open_queue))
        .route(
            "/businesses/:business_id/admission",
            get(queues::admission_check),
        )
        .route("/businesses/:business_id/plan", put(queues::set_plan))
        .route("/queues/:id/pause", post(queues::pause_queue))
        .route("/queues/:id/resume", post(queues::resume_queue))
        .route("/queues/:id/close", post(queues::close_queue))
        .route("/queues/:id/call-next", post(queues::call_next))
        .route("/tickets/:id", delete(bookings::remove_ticket))
        .route("/tickets/:id/call", post(bookings::call_ticket))
        .route("/tickets/:id/serve", post(bookings::serve_ticket))
        .route("/tickets/:id/complete", post(bookings::complete_ticket))
        .route("/tickets/:id/missed", post(bookings::mark_missed))
        .route("/tickets/:id/reactivate", post(bookings::reactivate))
        .route("/tickets/:id/cancel", post(bookings::staff_cancel))
        .route("/tickets/:id/refund", post(payments::refund));

    let internal = Router::new().route("/business-events", post(events::relay_business_event));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/ws", get(websocket::ws_handler))
        .nest(
            "/api",
            customer.nest("/staff", staff).nest("/internal", internal),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
