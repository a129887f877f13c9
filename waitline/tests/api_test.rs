//! HTTP contract tests over the full router.
//!
//! Run with: `cargo test --test api_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::too_many_lines)]

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use common::Harness;
use serde_json::{Value, json};
use waitline::api::CUSTOMER_HEADER;
use waitline::build_router;
use waitline::payment_gateway::MockPaymentGateway;
use waitline_core::environment::Clock;
use waitline_core::types::{BookingReference, CustomerId, Money, Queue};

fn server(h: &Harness) -> TestServer {
    TestServer::new(build_router(h.state.clone())).unwrap()
}

fn customer_header() -> HeaderName {
    HeaderName::from_static(CUSTOMER_HEADER)
}

fn header_value(customer: CustomerId) -> HeaderValue {
    HeaderValue::from_str(&customer.to_string()).unwrap()
}

fn booking_body(queue: &Queue) -> Value {
    json!({
        "business_id": queue.business_id,
        "service_type": "examination",
        "payment_method": "cash",
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let h = Harness::new();
    let server = server(&h);

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn in_memory_store_is_always_ready() {
    let h = Harness::new();
    let server = server(&h);

    let response = server.get("/ready").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["ready"], true);
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn booking_returns_created_then_replays() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let server = server(&h);
    let mut body = booking_body(&queue);
    body["booking_reference"] = json!("retry-me");

    let first = server.post("/api/bookings").json(&body).await;
    first.assert_status(StatusCode::CREATED);
    let first: Value = first.json();
    assert_eq!(first["ticket"]["number"], 1);
    assert_eq!(first["ticket"]["status"], "waiting");
    assert_eq!(first["replayed"], false);

    let second = server.post("/api/bookings").json(&body).await;
    second.assert_status_ok();
    let second: Value = second.json();
    assert_eq!(second["ticket"]["id"], first["ticket"]["id"]);
    assert_eq!(second["replayed"], true);
}

#[tokio::test]
async fn booking_a_paused_queue_conflicts() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let server = server(&h);

    server
        .post(&format!("/api/staff/queues/{}/pause", queue.id))
        .await
        .assert_status_ok();
    let response = server.post("/api/bookings").json(&booking_body(&queue)).await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn my_tickets_requires_an_identity() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let server = server(&h);
    let customer = CustomerId::new();

    server
        .post("/api/bookings")
        .add_header(customer_header(), header_value(customer))
        .json(&booking_body(&queue))
        .await
        .assert_status(StatusCode::CREATED);

    server
        .get("/api/me/tickets")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let mine = server
        .get("/api/me/tickets")
        .add_header(customer_header(), header_value(customer))
        .await;
    mine.assert_status_ok();
    let tickets: Vec<Value> = mine.json();
    assert_eq!(tickets.len(), 1);
}

#[tokio::test]
async fn customers_cannot_cancel_other_tickets() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_cash(&queue).await.ticket;
    let server = server(&h);

    let response = server
        .post(&format!("/api/tickets/{}/cancel", ticket.id))
        .add_header(customer_header(), header_value(CustomerId::new()))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let owner = ticket.customer_id.unwrap();
    let response = server
        .post(&format!("/api/tickets/{}/cancel", ticket.id))
        .add_header(customer_header(), header_value(owner))
        .json(&json!({ "reason": "changed plans" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn invalid_transition_is_a_conflict() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_cash(&queue).await.ticket;
    let server = server(&h);

    for step in ["call", "serve", "complete"] {
        server
            .post(&format!("/api/staff/tickets/{}/{step}", ticket.id))
            .await
            .assert_status_ok();
    }
    let response = server
        .post(&format!("/api/staff/tickets/{}/call", ticket.id))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn call_next_on_an_empty_queue_has_no_content() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let server = server(&h);

    let response = server
        .post(&format!("/api/staff/queues/{}/call-next", queue.id))
        .await;

    response.assert_status(StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn dashboard_and_estimate() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    h.book_cash(&queue).await;
    h.book_cash(&queue).await;
    let server = server(&h);

    let dashboard = server
        .get(&format!("/api/businesses/{}/queue", queue.business_id))
        .await;
    dashboard.assert_status_ok();
    let dashboard: Value = dashboard.json();
    assert_eq!(dashboard["status"], "active");
    assert_eq!(dashboard["waiting"].as_array().unwrap().len(), 2);

    let eta = server
        .get(&format!("/api/businesses/{}/eta", queue.business_id))
        .add_query_param("service_type", "consultation")
        .await;
    eta.assert_status_ok();
    let eta: Value = eta.json();
    assert_eq!(eta["method"], "default");
}

#[tokio::test]
async fn signed_webhook_settles_over_http() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let ticket = h.book_online(&queue, 1200).await.ticket;
    let server = server(&h);
    let payload = MockPaymentGateway::checkout_completed_payload(
        &ticket.booking_reference,
        "pi_http",
        Money::from_cents(1200),
    );
    let signature = h
        .gateway
        .sign(payload.as_bytes(), h.clock.now().timestamp())
        .unwrap();

    let unsigned = server
        .post("/api/payments/webhook")
        .bytes(payload.clone().into())
        .await;
    unsigned.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .post("/api/payments/webhook")
        .add_header(
            HeaderName::from_static("stripe-signature"),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .bytes(payload.into())
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["received"], true);
    assert_eq!(body["settlement"]["outcome"], "settled");
    assert_eq!(body["settlement"]["ticket"]["status"], "waiting");
}

#[tokio::test]
async fn forged_webhook_is_rejected() {
    let h = Harness::new();
    let payload = MockPaymentGateway::checkout_completed_payload(
        &BookingReference::new("whatever"),
        "pi_x",
        Money::from_cents(100),
    );

    let response = server(&h)
        .post("/api/payments/webhook")
        .add_header(
            HeaderName::from_static("stripe-signature"),
            HeaderValue::from_static("t=1,v1=deadbeef"),
        )
        .bytes(payload.into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VERIFICATION_FAILED");
}

#[tokio::test]
async fn business_events_reach_the_global_room() {
    let h = Harness::new();
    let mut global = h.state.broadcaster.subscribe("global").await;
    let server = server(&h);

    let response = server
        .post("/api/internal/business-events")
        .json(&json!({
            "change": "updated",
            "business_id": uuid::Uuid::new_v4(),
            "payload": { "name": "Harbour Clinic" },
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["event"], "businessUpdated");
    assert_eq!(body["delivered"], 1);
    let delivered = global.try_recv().unwrap();
    assert_eq!(delivered.event.name(), "businessUpdated");
}

#[tokio::test]
async fn plan_change_and_admission_check() {
    let h = Harness::new();
    let queue = h.open_queue().await;
    let server = server(&h);

    server
        .put(&format!("/api/staff/businesses/{}/plan", queue.business_id))
        .json(&json!({ "plan": "pro" }))
        .await
        .assert_status_ok();

    let response = server
        .get(&format!("/api/staff/businesses/{}/admission", queue.business_id))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["limit"], 500);
    assert_eq!(body["granted"], true);
}

#[tokio::test]
async fn unknown_ticket_is_not_found() {
    let h = Harness::new();

    let response = server(&h)
        .get(&format!("/api/tickets/{}", uuid::Uuid::new_v4()))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}
