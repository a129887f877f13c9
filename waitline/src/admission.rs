//! Admission Gate: monthly booking quota per subscription plan.
//!
//! The booking path consumes admissions through
//! [`SubscriptionStore::consume_admission`](crate::store::SubscriptionStore::consume_admission)
//! directly; this service exposes the read-only check and the plan entry
//! point used by the billing layer.

use crate::engine::Result;
use crate::store::Store;
use std::sync::Arc;
use waitline_core::environment::Clock;
use waitline_core::subscription::{AdmissionDecision, PlanTier, Subscription};
use waitline_core::types::BusinessId;

/// Quota checks and plan changes
#[derive(Clone)]
pub struct AdmissionGate {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    /// Create a gate
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Whether the business may admit another booking right now.
    ///
    /// Does not count anything; a business without a subscription is
    /// reported against the basic plan.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn check(&self, business_id: BusinessId) -> Result<AdmissionDecision> {
        let now = self.clock.now();
        let subscription = self
            .store
            .get_subscription(business_id)
            .await?
            .unwrap_or_else(|| Subscription::new(business_id, PlanTier::Basic, now));
        Ok(subscription.check(now))
    }

    /// Record one admission (reset-if-new-month, then increment-if-below-limit).
    ///
    /// # Errors
    ///
    /// Returns [`waitline_core::DomainError::AdmissionDenied`] at the limit.
    pub async fn record(&self, business_id: BusinessId) -> Result<AdmissionDecision> {
        Ok(self
            .store
            .consume_admission(business_id, self.clock.now())
            .await?)
    }

    /// Change a business's plan; the month's count is kept.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn set_plan(&self, business_id: BusinessId, plan: PlanTier) -> Result<Subscription> {
        let subscription = self
            .store
            .set_plan(business_id, plan, self.clock.now())
            .await?;
        tracing::info!(%business_id, %plan, "Subscription plan set");
        Ok(subscription)
    }
}
