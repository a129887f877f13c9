//! Payment gateway integration.
//!
//! [`StripeGateway`] talks to Stripe Checkout over its REST API (no SDK).
//! [`MockPaymentGateway`] keeps sessions in memory and signs webhook
//! payloads with the same scheme, so the reconciler can be exercised end to
//! end without network access.
//!
//! Webhook signatures follow Stripe's `t=<unix>,v1=<hex hmac-sha256>` header
//! over `"{t}.{payload}"`.

use crate::config::{PaymentConfig, PaymentProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use waitline_core::types::{BookingReference, Money, TicketId};

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Payment gateway error
#[derive(Error, Debug)]
pub enum PaymentGatewayError {
    /// Webhook signature or timestamp rejected
    #[error("Webhook verification failed: {0}")]
    Verification(&'static str),

    /// Gateway did not answer in time
    #[error("Gateway timeout")]
    Timeout,

    /// Transport failure
    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway answered with an error or an unexpected body
    #[error("Gateway rejected request: {0}")]
    Rejected(String),

    /// Payload could not be parsed
    #[error("Malformed gateway payload: {0}")]
    Malformed(String),

    /// Session id unknown to the gateway
    #[error("Unknown checkout session: {0}")]
    UnknownSession(String),
}

/// What to charge for a ticket
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Reference echoed back in webhooks (`client_reference_id`)
    pub reference: BookingReference,
    /// Ticket being paid for
    pub ticket_id: TicketId,
    /// Amount to charge
    pub amount: Money,
    /// Line item label
    pub description: String,
}

/// A created hosted-checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    /// Gateway session id
    pub session_id: String,
    /// URL the customer is redirected to
    pub url: String,
}

/// State of a checkout session as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Gateway session id
    pub session_id: String,
    /// Booking reference attached at creation
    pub reference: BookingReference,
    /// Payment transaction id, once paid
    pub transaction_id: Option<String>,
    /// Amount charged
    pub amount: Money,
    /// Whether the customer completed payment
    pub paid: bool,
}

/// A verified inbound gateway notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A checkout session was paid
    CheckoutCompleted {
        /// Booking reference
        reference: BookingReference,
        /// Payment transaction id
        transaction_id: String,
        /// Amount paid
        amount: Money,
    },
    /// Any other event type; acknowledged and ignored
    Ignored(String),
}

/// Payment gateway abstraction
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout session.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses or cannot be reached.
    async fn create_checkout_session(&self, request: &CheckoutRequest)
    -> GatewayResult<CheckoutSession>;

    /// Look up a checkout session.
    ///
    /// # Errors
    ///
    /// Returns error if the session is unknown or the gateway cannot be reached.
    async fn retrieve_session(&self, session_id: &str) -> GatewayResult<SessionStatus>;

    /// Refund a payment. Returns the refund id.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses the refund.
    async fn refund(&self, transaction_id: &str, amount: Money) -> GatewayResult<String>;

    /// Verify a signed webhook and decode its event.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError::Verification`] for a bad signature or a
    /// stale timestamp, [`PaymentGatewayError::Malformed`] for a bad body.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> GatewayResult<GatewayEvent>;
}

/// Build the gateway selected by configuration
#[must_use]
pub fn from_config(config: &PaymentConfig) -> Arc<dyn PaymentGateway> {
    match config.provider {
        PaymentProvider::Stripe => Arc::new(StripeGateway::new(config)),
        PaymentProvider::Mock => Arc::new(MockPaymentGateway::new(
            config.webhook_secret.clone(),
            config.webhook_tolerance_secs,
        )),
    }
}

// ============================================================================
// Signatures
// ============================================================================

fn mac(secret: &str, timestamp: &str, payload: &[u8]) -> GatewayResult<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentGatewayError::Verification("HMAC key error"))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Check a `t=…,v1=…` signature header against `payload`.
///
/// # Errors
///
/// Returns [`PaymentGatewayError::Verification`] when the header is
/// malformed, no `v1` signature matches, or the timestamp is more than
/// `tolerance_secs` away from `now`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> GatewayResult<()> {
    let mut timestamp = "";
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    if timestamp.is_empty() || signatures.is_empty() {
        return Err(PaymentGatewayError::Verification("Invalid signature header"));
    }

    // Several v1 entries appear while a secret is being rolled
    let matched = signatures.iter().any(|signature| {
        hex::decode(signature).is_ok_and(|bytes| {
            mac(secret, timestamp, payload).is_ok_and(|m| m.verify_slice(&bytes).is_ok())
        })
    });
    if !matched {
        return Err(PaymentGatewayError::Verification("Webhook signature mismatch"));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| PaymentGatewayError::Verification("Invalid timestamp"))?;
    if (now.timestamp() - ts).abs() > tolerance_secs {
        return Err(PaymentGatewayError::Verification("Webhook timestamp outside tolerance"));
    }

    Ok(())
}

/// Produce a signature header for `payload` at `timestamp`.
///
/// # Errors
///
/// Returns error only if the secret cannot key an HMAC.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> GatewayResult<String> {
    let timestamp = timestamp.to_string();
    let digest = mac(secret, &timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    data: WireEventData,
}

#[derive(Deserialize)]
struct WireEventData {
    object: WireSession,
}

#[derive(Deserialize)]
struct WireSession {
    id: String,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    amount_total: Option<u64>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl WireSession {
    fn into_status(self) -> GatewayResult<SessionStatus> {
        let reference = self
            .client_reference_id
            .ok_or_else(|| PaymentGatewayError::Malformed("session without reference".into()))?;
        Ok(SessionStatus {
            paid: self.payment_status.as_deref() == Some("paid"),
            transaction_id: self.payment_intent,
            amount: Money::from_cents(self.amount_total.unwrap_or(0)),
            reference: BookingReference::new(reference),
            session_id: self.id,
        })
    }
}

fn parse_event(payload: &[u8]) -> GatewayResult<GatewayEvent> {
    let event: WireEvent = serde_json::from_slice(payload)
        .map_err(|e| PaymentGatewayError::Malformed(e.to_string()))?;

    if event.kind != "checkout.session.completed" {
        return Ok(GatewayEvent::Ignored(event.kind));
    }

    let status = event.data.object.into_status()?;
    let transaction_id = status
        .transaction_id
        .unwrap_or_else(|| status.session_id.clone());
    Ok(GatewayEvent::CheckoutCompleted {
        reference: status.reference,
        transaction_id,
        amount: status.amount,
    })
}

// ============================================================================
// Stripe
// ============================================================================

/// Stripe Checkout over the REST API
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    webhook_secret: String,
    currency: String,
    success_url: String,
    cancel_url: String,
    tolerance_secs: i64,
}

impl StripeGateway {
    /// Create a gateway from configuration
    #[must_use]
    pub fn new(config: &PaymentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: "https://api.stripe.com/v1".to_string(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            currency: config.currency.clone(),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
            tolerance_secs: config.webhook_tolerance_secs,
        }
    }

    /// Point the gateway at another API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> GatewayResult<serde_json::Value> {
        let response = request
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PaymentGatewayError::Timeout
                } else {
                    PaymentGatewayError::Http(e)
                }
            })?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(PaymentGatewayError::Rejected(format!("{status}: {message}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> GatewayResult<CheckoutSession> {
        let amount = request.amount.cents().to_string();
        let ticket_id = request.ticket_id.to_string();
        let success_url = self
            .success_url
            .replace("{REFERENCE}", request.reference.as_str());

        let body = self
            .send(
                self.client
                    .post(format!("{}/checkout/sessions", self.base_url))
                    .form(&[
                        ("mode", "payment"),
                        ("client_reference_id", request.reference.as_str()),
                        ("line_items[0][quantity]", "1"),
                        ("line_items[0][price_data][currency]", self.currency.as_str()),
                        ("line_items[0][price_data][unit_amount]", amount.as_str()),
                        (
                            "line_items[0][price_data][product_data][name]",
                            request.description.as_str(),
                        ),
                        ("success_url", success_url.as_str()),
                        ("cancel_url", self.cancel_url.as_str()),
                        ("metadata[ticket_id]", ticket_id.as_str()),
                    ]),
            )
            .await?;

        let session: WireSession = serde_json::from_value(body.clone())
            .map_err(|e| PaymentGatewayError::Malformed(e.to_string()))?;
        let url = session
            .url
            .ok_or_else(|| PaymentGatewayError::Rejected(format!("session without url: {body}")))?;

        tracing::info!(
            session_id = %session.id,
            reference = %request.reference,
            amount = request.amount.cents(),
            "Checkout session created"
        );

        Ok(CheckoutSession {
            session_id: session.id,
            url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> GatewayResult<SessionStatus> {
        let body = self
            .send(
                self.client
                    .get(format!("{}/checkout/sessions/{session_id}", self.base_url)),
            )
            .await?;
        let session: WireSession = serde_json::from_value(body)
            .map_err(|e| PaymentGatewayError::Malformed(e.to_string()))?;
        session.into_status()
    }

    async fn refund(&self, transaction_id: &str, amount: Money) -> GatewayResult<String> {
        let amount = amount.cents().to_string();
        let body = self
            .send(
                self.client
                    .post(format!("{}/refunds", self.base_url))
                    .form(&[("payment_intent", transaction_id), ("amount", amount.as_str())]),
            )
            .await?;

        body["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PaymentGatewayError::Rejected(format!("refund without id: {body}")))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> GatewayResult<GatewayEvent> {
        verify_signature(payload, signature, &self.webhook_secret, self.tolerance_secs, now)?;
        parse_event(payload)
    }
}

// ============================================================================
// Mock
// ============================================================================

#[derive(Debug, Clone)]
struct MockSession {
    reference: BookingReference,
    amount: Money,
    transaction_id: Option<String>,
}

/// In-memory gateway for development and tests
pub struct MockPaymentGateway {
    secret: String,
    tolerance_secs: i64,
    sessions: Mutex<HashMap<String, MockSession>>,
    refunds: Mutex<Vec<String>>,
}

impl MockPaymentGateway {
    /// Create a mock gateway signing with `secret`
    #[must_use]
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
            sessions: Mutex::new(HashMap::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the customer paying; returns the new transaction id.
    pub fn complete_session(&self, session_id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(session_id)?;
        let transaction_id = session
            .transaction_id
            .get_or_insert_with(|| format!("mock_txn_{}", uuid::Uuid::new_v4().simple()));
        Some(transaction_id.clone())
    }

    /// Session id created for a booking reference
    pub fn session_for(&self, reference: &BookingReference) -> Option<String> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, s)| &s.reference == reference)
            .map(|(id, _)| id.clone())
    }

    /// Transaction ids refunded so far
    pub fn refunded(&self) -> Vec<String> {
        self.refunds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A `checkout.session.completed` event body as the gateway would send it
    #[must_use]
    pub fn checkout_completed_payload(
        reference: &BookingReference,
        transaction_id: &str,
        amount: Money,
    ) -> String {
        serde_json::json!({
            "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": format!("cs_{}", uuid::Uuid::new_v4().simple()),
                    "client_reference_id": reference.as_str(),
                    "payment_intent": transaction_id,
                    "amount_total": amount.cents(),
                    "payment_status": "paid",
                }
            }
        })
        .to_string()
    }

    /// Sign `payload` the way the gateway does.
    ///
    /// # Errors
    ///
    /// Returns error only if the secret cannot key an HMAC.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> GatewayResult<String> {
        sign_payload(payload, &self.secret, timestamp)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> GatewayResult<CheckoutSession> {
        let session_id = format!("cs_mock_{}", uuid::Uuid::new_v4().simple());
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                session_id.clone(),
                MockSession {
                    reference: request.reference.clone(),
                    amount: request.amount,
                    transaction_id: None,
                },
            );

        tracing::info!(
            session_id = %session_id,
            reference = %request.reference,
            amount = request.amount.cents(),
            "Mock checkout session created"
        );

        Ok(CheckoutSession {
            url: format!("https://checkout.mock/pay/{session_id}"),
            session_id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> GatewayResult<SessionStatus> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get(session_id)
            .ok_or_else(|| PaymentGatewayError::UnknownSession(session_id.to_string()))?;
        Ok(SessionStatus {
            session_id: session_id.to_string(),
            reference: session.reference.clone(),
            transaction_id: session.transaction_id.clone(),
            amount: session.amount,
            paid: session.transaction_id.is_some(),
        })
    }

    async fn refund(&self, transaction_id: &str, amount: Money) -> GatewayResult<String> {
        let refund_id = format!("mock_refund_{}", uuid::Uuid::new_v4().simple());
        self.refunds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transaction_id.to_string());

        tracing::info!(
            transaction_id,
            amount = amount.cents(),
            refund_id = %refund_id,
            "Mock refund processed"
        );

        Ok(refund_id)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> GatewayResult<GatewayEvent> {
        verify_signature(payload, signature, &self.secret, self.tolerance_secs, now)?;
        parse_event(payload)
    }
}
