//! Wait-time estimation.
//!
//! An optional prediction oracle is consulted first; any failure, timeout or
//! unusable answer falls back to the deterministic hybrid estimate computed
//! from completed-service history.

use crate::metrics;
use crate::store::Store;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use waitline_core::DomainError;
use waitline_core::environment::Clock;
use waitline_core::eta::{
    Confidence, Estimate, LONG_TERM_WINDOW_DAYS, OracleContext, SHORT_TERM_SAMPLES,
    hybrid_estimate,
};
use waitline_core::types::{BusinessId, ServiceType};

use crate::config::OracleConfig;

/// External wait-time predictor
#[async_trait]
pub trait PredictionOracle: Send + Sync {
    /// Predict the total wait for the given context.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EstimatorUnavailable`] when no usable
    /// prediction could be obtained.
    async fn predict(&self, context: &OracleContext) -> Result<Estimate, DomainError>;
}

/// Oracle that is never available
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

#[async_trait]
impl PredictionOracle for NoOracle {
    async fn predict(&self, _context: &OracleContext) -> Result<Estimate, DomainError> {
        Err(DomainError::EstimatorUnavailable("no oracle configured".into()))
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message; 1],
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Prediction {
    minutes: f64,
    #[serde(default)]
    confidence: Option<String>,
}

const SYSTEM_PROMPT: &str = "You estimate total waiting time for a service queue. \
Reply with a single JSON object {\"minutes\": <number>, \"confidence\": \"low\"|\"medium\"|\"high\"} and nothing else.";

/// Oracle backed by the Anthropic Messages API
#[derive(Clone)]
pub struct ClaudeOracle {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl ClaudeOracle {
    /// Create an oracle with an explicit key
    #[must_use]
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            api_url,
            model,
        }
    }

    /// Build from configuration; `None` when no API key is configured
    #[must_use]
    pub fn from_config(config: &OracleConfig) -> Option<Self> {
        config
            .api_key
            .clone()
            .map(|key| Self::new(key, config.base_url.clone(), config.model.clone()))
    }

    fn prompt(context: &OracleContext) -> String {
        format!(
            "Waiting tickets: {}\nRecent service durations in minutes (oldest first): {:?}\n\
             Hour of day (UTC): {}\nDay of week: {}\nService type: {:?}\n\
             Estimate the total minutes until the last waiting ticket is served.",
            context.waiting_count,
            context.recent_durations,
            context.hour_of_day,
            context.day_of_week,
            context.service_type,
        )
    }
}

/// Pull the first JSON object out of a model reply
fn parse_prediction(text: &str) -> Result<Estimate, DomainError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(DomainError::EstimatorUnavailable("no JSON in reply".into())),
    };

    let prediction: Prediction = serde_json::from_str(json)
        .map_err(|e| DomainError::EstimatorUnavailable(format!("unparseable reply: {e}")))?;
    let confidence = prediction
        .confidence
        .as_deref()
        .map_or(Confidence::Medium, Confidence::parse);

    Estimate::from_oracle(prediction.minutes, confidence).ok_or_else(|| {
        DomainError::EstimatorUnavailable(format!("unusable minutes {}", prediction.minutes))
    })
}

#[async_trait]
impl PredictionOracle for ClaudeOracle {
    async fn predict(&self, context: &OracleContext) -> Result<Estimate, DomainError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 64,
            system: SYSTEM_PROMPT,
            messages: [Message {
                role: "user",
                content: Self::prompt(context),
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| DomainError::EstimatorUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::EstimatorUnavailable(format!(
                "oracle returned {}",
                response.status()
            )));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DomainError::EstimatorUnavailable(e.to_string()))?;
        let text: String = body.content.into_iter().filter_map(|b| b.text).collect();
        parse_prediction(&text)
    }
}

/// Produces wait estimates for a business's queue
#[derive(Clone)]
pub struct EtaEstimator {
    store: Arc<dyn Store>,
    oracle: Arc<dyn PredictionOracle>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl EtaEstimator {
    /// Create an estimator
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        oracle: Arc<dyn PredictionOracle>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            oracle,
            clock,
            timeout,
        }
    }

    /// Estimate the total wait for `waiting_count` tickets of `service_type`.
    ///
    /// Never fails: store errors degrade to the default estimate and oracle
    /// failures to the hybrid estimate.
    pub async fn estimate(
        &self,
        business_id: BusinessId,
        service_type: ServiceType,
        waiting_count: u32,
    ) -> Estimate {
        let now = self.clock.now();

        let recent = match self.store.recent_samples(business_id, SHORT_TERM_SAMPLES).await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(%business_id, error = %e, "Service history unavailable; using default estimate");
                let estimate = Estimate::default_estimate();
                metrics::record_estimate(estimate.method);
                return estimate;
            }
        };

        let context = OracleContext::new(waiting_count, &recent, service_type, now);
        let oracle = tokio::time::timeout(self.timeout, self.oracle.predict(&context)).await;
        let estimate = match oracle {
            Ok(Ok(estimate)) => estimate,
            Ok(Err(e)) => {
                tracing::debug!(%business_id, error = %e, "Oracle unavailable; using hybrid estimate");
                self.hybrid(business_id, &recent, service_type, waiting_count, now)
                    .await
            }
            Err(_) => {
                tracing::warn!(%business_id, timeout_ms = self.timeout.as_millis(), "Oracle timed out; using hybrid estimate");
                self.hybrid(business_id, &recent, service_type, waiting_count, now)
                    .await
            }
        };

        metrics::record_estimate(estimate.method);
        estimate
    }

    async fn hybrid(
        &self,
        business_id: BusinessId,
        recent: &[waitline_core::eta::ServiceSample],
        service_type: ServiceType,
        waiting_count: u32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Estimate {
        let since = now - ChronoDuration::days(LONG_TERM_WINDOW_DAYS);
        let history = self
            .store
            .samples_since(business_id, since)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(%business_id, error = %e, "Long-term history unavailable");
                Vec::new()
            });
        hybrid_estimate(recent, &history, service_type, waiting_count, now)
    }
}
