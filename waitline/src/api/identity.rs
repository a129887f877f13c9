//! Caller identity.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! customer in the `x-customer-id` header. Guests and walk-ins send none.

use super::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;
use waitline_core::types::CustomerId;

/// Header carrying the authenticated customer id
pub const CUSTOMER_HEADER: &str = "x-customer-id";

/// Optional caller identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Option<CustomerId>);

/// Required caller identity; rejects anonymous requests with 401
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Customer(pub CustomerId);

fn customer_from_parts(parts: &Parts) -> Result<Option<CustomerId>, AppError> {
    let Some(value) = parts.headers.get(CUSTOMER_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| AppError::bad_request("x-customer-id is not valid text"))?;
    let uuid = Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::bad_request("x-customer-id is not a UUID"))?;
    Ok(Some(CustomerId::from_uuid(uuid)))
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        customer_from_parts(parts).map(Self)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Customer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        customer_from_parts(parts)?
            .map(Self)
            .ok_or_else(|| AppError::unauthorized("Sign in to continue"))
    }
}
