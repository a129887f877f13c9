//! Business metrics for the queue service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `waitline_tickets_total{status}` - Ticket lifecycle transitions by resulting status
//! - `waitline_admissions_denied_total` - Bookings refused by the monthly plan limit
//! - `waitline_payments_total{outcome}` - Payment confirmations, duplicates, failures, refunds
//! - `waitline_eta_estimates_total{method}` - Wait estimates by the method that produced them
//!
//! ## Gauges
//! - `waitline_ws_connections` - Open real-time connections
//!
//! ## Histograms
//! - `waitline_service_duration_minutes` - Time from call to completion

use metrics::{describe_counter, describe_gauge, describe_histogram};
use waitline_core::eta::EstimateMethod;
use waitline_core::types::TicketStatus;

/// Register all metric descriptions.
///
/// Call once at startup, before any metric is recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "waitline_tickets_total",
        "Ticket lifecycle transitions by resulting status"
    );
    describe_counter!(
        "waitline_admissions_denied_total",
        "Bookings refused because the monthly plan limit was reached"
    );
    describe_counter!(
        "waitline_payments_total",
        "Payment notifications by outcome (confirmed, duplicate, failed, refunded)"
    );
    describe_counter!(
        "waitline_eta_estimates_total",
        "Wait-time estimates by method (oracle, hybrid, default)"
    );
    describe_gauge!("waitline_ws_connections", "Open real-time connections");
    describe_histogram!(
        "waitline_service_duration_minutes",
        "Minutes from a ticket being called to its completion"
    );

    tracing::info!("Business metrics registered");
}

/// Record a ticket reaching `status`.
pub fn record_ticket(status: TicketStatus) {
    metrics::counter!("waitline_tickets_total", "status" => status.as_str()).increment(1);
    tracing::debug!(%status, "Recorded ticket metric");
}

/// Record an admission refused at the plan limit.
pub fn record_admission_denied() {
    metrics::counter!("waitline_admissions_denied_total").increment(1);
}

/// Record a payment outcome (`confirmed`, `duplicate`, `failed`, `refunded`).
pub fn record_payment(outcome: &'static str) {
    metrics::counter!("waitline_payments_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded payment metric");
}

/// Record which method produced an estimate.
pub fn record_estimate(method: EstimateMethod) {
    metrics::counter!("waitline_eta_estimates_total", "method" => method.as_str()).increment(1);
}

/// Record a completed service duration.
pub fn record_service_duration(minutes: f64) {
    metrics::histogram!("waitline_service_duration_minutes").record(minutes);
}

/// Adjust the open connection gauge.
pub fn record_connection_opened() {
    metrics::gauge!("waitline_ws_connections").increment(1.0);
}

/// Adjust the open connection gauge.
pub fn record_connection_closed() {
    metrics::gauge!("waitline_ws_connections").decrement(1.0);
}
