//! HTTP error type.
//!
//! Bridges [`EngineError`] to HTTP responses. Client errors carry a stable
//! `code` for programmatic handling; server errors are logged with their
//! source and surfaced without detail.

use crate::engine::EngineError;
use crate::payment_gateway::PaymentGatewayError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use waitline_core::DomainError;

/// Application error returned by handlers
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error (logged, never sent)
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 401 Unauthorized
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// 403 Forbidden
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"))
    }

    /// 409 Conflict
    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// 503 Service Unavailable
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match &err {
            DomainError::AdmissionDenied { .. } => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "ADMISSION_DENIED", err.to_string())
            }
            DomainError::QueueNotAcceptingTickets { .. } => {
                Self::conflict("QUEUE_NOT_ACCEPTING", err.to_string())
            }
            DomainError::InvalidTicketTransition { .. } => {
                // Detail stays in the log
                tracing::warn!(error = %err, "Ticket transition rejected");
                Self::conflict("INVALID_TRANSITION", "The ticket cannot be changed that way")
            }
            DomainError::InvalidQueueTransition { .. } => {
                Self::conflict("INVALID_QUEUE_TRANSITION", err.to_string())
            }
            DomainError::DuplicatePaymentNotification(_) | DomainError::TicketAlreadyExists => {
                Self::conflict("DUPLICATE", err.to_string())
            }
            DomainError::NotRefundable(_) => Self::conflict("NOT_REFUNDABLE", err.to_string()),
            DomainError::GatewayVerificationFailed(_) => {
                Self::new(StatusCode::BAD_REQUEST, "VERIFICATION_FAILED", err.to_string())
            }
            DomainError::InvalidBooking(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", err.to_string())
            }
            DomainError::TicketNotFound => Self::not_found("Ticket"),
            DomainError::EstimatorUnavailable(_) => Self::unavailable(err.to_string()),
        }
    }
}

impl From<PaymentGatewayError> for AppError {
    fn from(err: PaymentGatewayError) -> Self {
        match err {
            PaymentGatewayError::Verification(_) | PaymentGatewayError::Malformed(_) => {
                Self::new(StatusCode::BAD_REQUEST, "VERIFICATION_FAILED", err.to_string())
            }
            PaymentGatewayError::UnknownSession(_) => Self::not_found("Checkout session"),
            PaymentGatewayError::Timeout => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "PAYMENT_GATEWAY_TIMEOUT",
                "Payment provider did not respond",
            ),
            PaymentGatewayError::Http(_) | PaymentGatewayError::Rejected(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                "PAYMENT_GATEWAY_ERROR",
                "Payment provider request failed",
            )
            .with_source(err.into()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Domain(e) => e.into(),
            EngineError::Gateway(e) => e.into(),
            EngineError::NotFound(what) => Self::not_found(what),
            EngineError::Conflict(msg) => Self::conflict("CONFLICT", msg),
            EngineError::Store(e) => {
                Self::internal("An internal error occurred").with_source(e.into())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
