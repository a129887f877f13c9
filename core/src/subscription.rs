//! Admission Gate arithmetic: plan limits and the monthly booking counter.
//!
//! The counter resets on the first touch in a new UTC calendar month and
//! otherwise only grows, except for [`Subscription::release`], which returns
//! one admission whose booking could not be completed.

use crate::error::DomainError;
use crate::types::BusinessId;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Subscription plan tier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Entry plan, also used for trials and unknown plans
    #[default]
    Basic,
    /// Pro plan
    Pro,
    /// Enterprise plan
    Enterprise,
}

impl PlanTier {
    /// Monthly booking limit for the plan
    #[must_use]
    pub const fn monthly_limit(self) -> u32 {
        match self {
            Self::Basic => 50,
            Self::Pro => 500,
            Self::Enterprise => 2000,
        }
    }

    /// Parse a plan name; anything unrecognised falls back to basic.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pro" => Self::Pro,
            "enterprise" => Self::Enterprise,
            _ => Self::Basic,
        }
    }

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PlanTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Result of an admission check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// Whether a booking may proceed
    pub granted: bool,
    /// Bookings counted this month (after the check)
    pub count: u32,
    /// Plan limit
    pub limit: u32,
    /// Bookings left this month
    pub remaining: u32,
}

impl AdmissionDecision {
    const fn new(granted: bool, count: u32, limit: u32) -> Self {
        Self {
            granted,
            count,
            limit,
            remaining: limit.saturating_sub(count),
        }
    }
}

/// Whether two instants fall in the same UTC calendar month
#[must_use]
pub fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// A business's subscription usage counter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Business
    pub business_id: BusinessId,
    /// Plan tier
    pub plan: PlanTier,
    /// Bookings admitted since `last_booking_reset`
    pub monthly_booking_count: u32,
    /// Start of the counting period
    pub last_booking_reset: DateTime<Utc>,
}

impl Subscription {
    /// A fresh counter on the given plan
    #[must_use]
    pub const fn new(business_id: BusinessId, plan: PlanTier, now: DateTime<Utc>) -> Self {
        Self {
            business_id,
            plan,
            monthly_booking_count: 0,
            last_booking_reset: now,
        }
    }

    /// Count as it would be after a month rollover at `now`
    #[must_use]
    pub fn effective_count(&self, now: DateTime<Utc>) -> u32 {
        if same_month(self.last_booking_reset, now) {
            self.monthly_booking_count
        } else {
            0
        }
    }

    /// Reset the counter if `now` is in a later month. Returns whether it did.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        if same_month(self.last_booking_reset, now) {
            return false;
        }
        self.monthly_booking_count = 0;
        self.last_booking_reset = now;
        true
    }

    /// Read-only admission check
    #[must_use]
    pub fn check(&self, now: DateTime<Utc>) -> AdmissionDecision {
        let count = self.effective_count(now);
        let limit = self.plan.monthly_limit();
        AdmissionDecision::new(count < limit, count, limit)
    }

    /// Roll over, then count one admission if below the limit.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::AdmissionDenied`] when the limit is reached. The
    /// rollover still applies in that case; the count does not change.
    pub fn try_consume(&mut self, now: DateTime<Utc>) -> Result<AdmissionDecision, DomainError> {
        self.roll_over(now);
        let limit = self.plan.monthly_limit();
        if self.monthly_booking_count >= limit {
            return Err(DomainError::AdmissionDenied {
                count: self.monthly_booking_count,
                limit,
            });
        }
        self.monthly_booking_count += 1;
        Ok(AdmissionDecision::new(true, self.monthly_booking_count, limit))
    }

    /// Give back one admission consumed at `consumed_at`.
    ///
    /// Only applies within the same month; a counter that has rolled over
    /// since is left alone.
    pub fn release(&mut self, consumed_at: DateTime<Utc>) {
        if same_month(self.last_booking_reset, consumed_at) {
            self.monthly_booking_count = self.monthly_booking_count.saturating_sub(1);
        }
    }
}
