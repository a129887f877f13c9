//! Outbound collaborators: transactional email and in-app notifications.
//!
//! Both are fire-and-forget from the lifecycle's point of view; a failure is
//! logged by the effect runner and never undoes a state change.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::info;
use waitline_core::events::{EmailRequest, Notification};
use waitline_core::types::CustomerId;

/// Delivery failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Sends transactional email
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one email.
    ///
    /// # Errors
    ///
    /// Returns error if the provider rejects or cannot be reached.
    async fn send(&self, email: &EmailRequest) -> Result<(), DeliveryError>;
}

/// Persists in-app notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Store one notification.
    ///
    /// # Errors
    ///
    /// Returns error if the notification could not be stored.
    async fn persist(&self, notification: &Notification) -> Result<(), DeliveryError>;

    /// A customer's notifications, oldest first
    async fn list(&self, recipient: CustomerId) -> Vec<Notification>;
}

/// Logs emails instead of sending them (development)
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: &EmailRequest) -> Result<(), DeliveryError> {
        info!(
            recipient = %email.recipient,
            subject = %email.subject,
            "\n\n{}\n{}\n",
            email.subject,
            email.body
        );
        Ok(())
    }
}

/// Keeps sent emails in memory (tests)
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailRequest>>,
}

impl RecordingMailer {
    /// Create an empty mailer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<EmailRequest> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &EmailRequest) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email.clone());
        Ok(())
    }
}

/// Notification store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryNotifications {
    by_recipient: Mutex<HashMap<CustomerId, Vec<Notification>>>,
}

impl InMemoryNotifications {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotifications {
    async fn persist(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.by_recipient
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(notification.recipient)
            .or_default()
            .push(notification.clone());
        Ok(())
    }

    async fn list(&self, recipient: CustomerId) -> Vec<Notification> {
        self.by_recipient
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&recipient)
            .cloned()
            .unwrap_or_default()
    }
}
