//! Wait-time estimation math.
//!
//! The hybrid model blends a short-term trend (linear regression over the
//! most recent service durations) with a long-term average taken from
//! completions in the same time-of-day and weekday/weekend bucket. Everything
//! here is deterministic; the oracle call and its fallback live in the
//! service crate.

use crate::types::ServiceType;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Most recent durations fed to the short-term trend
pub const SHORT_TERM_SAMPLES: usize = 10;

/// Durations above this many minutes are treated as outliers
pub const OUTLIER_CEILING_MINUTES: f64 = 240.0;

/// Short-term variance (min²) above which the long-term average dominates
pub const HIGH_VARIANCE_THRESHOLD: f64 = 50.0;

/// Estimate used when there is no history at all
pub const DEFAULT_ESTIMATE_MINUTES: u32 = 15;

/// Trailing window for the long-term average
pub const LONG_TERM_WINDOW_DAYS: i64 = 30;

/// How much to trust an estimate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Default or sparse data
    Low,
    /// Partial data or noisy history
    Medium,
    /// Both signals present and consistent
    High,
}

impl Confidence {
    /// Parse an oracle-reported confidence, defaulting to medium.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

/// Where an estimate came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    /// External prediction oracle
    Oracle,
    /// Regression and bucket average blend
    Hybrid,
    /// No history
    Default,
}

impl EstimateMethod {
    /// Stable lowercase name, used as a metric label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Hybrid => "hybrid",
            Self::Default => "default",
        }
    }
}

/// A wait-time estimate for the whole waiting line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    /// Total minutes
    pub estimated_minutes: u32,
    /// Confidence
    pub confidence: Confidence,
    /// Source
    pub method: EstimateMethod,
}

impl Estimate {
    /// The no-history estimate
    #[must_use]
    pub const fn default_estimate() -> Self {
        Self {
            estimated_minutes: DEFAULT_ESTIMATE_MINUTES,
            confidence: Confidence::Low,
            method: EstimateMethod::Default,
        }
    }

    /// Accept an oracle answer if it is a positive finite number.
    #[must_use]
    pub fn from_oracle(minutes: f64, confidence: Confidence) -> Option<Self> {
        if !minutes.is_finite() || minutes <= 0.0 {
            return None;
        }
        Some(Self {
            estimated_minutes: round_minutes(minutes),
            confidence,
            method: EstimateMethod::Oracle,
        })
    }
}

/// A completed ticket's service duration
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceSample {
    /// When service finished
    pub completed_at: DateTime<Utc>,
    /// `completed_at - called_at` in minutes
    pub duration_minutes: f64,
}

/// Context handed to a prediction oracle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleContext {
    /// Tickets waiting
    pub waiting_count: u32,
    /// Up to ten most recent durations in minutes, oldest first
    pub recent_durations: Vec<f64>,
    /// Hour of day (UTC)
    pub hour_of_day: u32,
    /// Day of week, e.g. "Mon"
    pub day_of_week: String,
    /// Service booked
    pub service_type: ServiceType,
}

impl OracleContext {
    /// Build the context from recent samples (newest first, as stores return them)
    #[must_use]
    pub fn new(
        waiting_count: u32,
        recent: &[ServiceSample],
        service_type: ServiceType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            waiting_count,
            recent_durations: recent_durations(recent),
            hour_of_day: now.hour(),
            day_of_week: now.weekday().to_string(),
            service_type,
        }
    }
}

/// Whether a duration is usable for estimation
#[must_use]
pub fn is_valid_duration(minutes: f64) -> bool {
    minutes.is_finite() && minutes > 0.0 && minutes <= OUTLIER_CEILING_MINUTES
}

/// Valid durations from the newest ≤10 samples, returned oldest first.
#[must_use]
pub fn recent_durations(newest_first: &[ServiceSample]) -> Vec<f64> {
    let mut durations: Vec<f64> = newest_first
        .iter()
        .map(|s| s.duration_minutes)
        .filter(|d| is_valid_duration(*d))
        .take(SHORT_TERM_SAMPLES)
        .collect();
    durations.reverse();
    durations
}

#[allow(clippy::cast_precision_loss)] // At most SHORT_TERM_SAMPLES points
fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn variance(values: &[f64]) -> f64 {
    let Some(avg) = mean(values) else {
        return 0.0;
    };
    values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64
}

/// Least-squares trend over `durations` (oldest first), predicting the next
/// point. Falls back to the mean when the projection is not positive.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn short_term_trend(durations: &[f64]) -> Option<f64> {
    let avg = mean(durations)?;
    let n = durations.len() as f64;
    let x_mean = (n - 1.0) / 2.0;

    let (num, den) = durations
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - avg), den + dx * dx)
        });

    let slope = if den == 0.0 { 0.0 } else { num / den };
    let predicted = avg + slope * (n - x_mean);
    Some(if predicted > 0.0 { predicted } else { avg })
}

const fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Whether `at` falls in the same bucket as `now`: within ±1 hour of day and
/// the same weekday/weekend class.
#[must_use]
pub fn in_same_bucket(at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let diff = at.hour().abs_diff(now.hour());
    let hour_distance = diff.min(24 - diff);
    hour_distance <= 1 && is_weekend(at.weekday()) == is_weekend(now.weekday())
}

/// Mean duration of bucketed completions in the trailing 30 days
#[must_use]
pub fn long_term_average(history: &[ServiceSample], now: DateTime<Utc>) -> Option<f64> {
    let since = now - Duration::days(LONG_TERM_WINDOW_DAYS);
    let bucket: Vec<f64> = history
        .iter()
        .filter(|s| s.completed_at >= since && s.completed_at <= now)
        .filter(|s| in_same_bucket(s.completed_at, now))
        .map(|s| s.duration_minutes)
        .filter(|d| is_valid_duration(*d))
        .collect();
    mean(&bucket)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to >= 1 first
fn round_minutes(minutes: f64) -> u32 {
    minutes.round().clamp(1.0, f64::from(u32::MAX)) as u32
}

/// Deterministic hybrid estimate.
///
/// `recent` is newest first (as stores return it); `history` is every
/// completion in the trailing window. Returns the default estimate when both
/// signals are empty.
#[must_use]
pub fn hybrid_estimate(
    recent: &[ServiceSample],
    history: &[ServiceSample],
    service_type: ServiceType,
    waiting_count: u32,
    now: DateTime<Utc>,
) -> Estimate {
    let durations = recent_durations(recent);
    let short = short_term_trend(&durations);
    let long = long_term_average(history, now);

    let (per_ticket, confidence) = match (short, long) {
        (None, None) => return Estimate::default_estimate(),
        (Some(short), Some(long)) => {
            if variance(&durations) > HIGH_VARIANCE_THRESHOLD {
                (0.3 * short + 0.7 * long, Confidence::Medium)
            } else {
                (0.6 * short + 0.4 * long, Confidence::High)
            }
        }
        (Some(only), None) | (None, Some(only)) => (only, Confidence::Medium),
    };

    let total = per_ticket * service_type.multiplier() * f64::from(waiting_count.max(1));
    Estimate {
        estimated_minutes: round_minutes(total),
        confidence,
        method: EstimateMethod::Hybrid,
    }
}

/// Share of `total` minutes for the ticket at 1-indexed `position` among
/// `waiting` tickets.
#[must_use]
pub fn position_eta(total: u32, waiting: u32, position: u32) -> u32 {
    if waiting == 0 {
        return total.max(1);
    }
    round_minutes(f64::from(total) / f64::from(waiting) * f64::from(position))
}
