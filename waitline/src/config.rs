//! Configuration management for the Waitline service.
//!
//! Loads configuration from environment variables (and a `.env` file when
//! present) with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// `PostgreSQL` configuration; `None` runs on the in-memory store
    pub database: Option<DatabaseConfig>,
    /// Queue defaults
    pub queue: QueueConfig,
    /// Payment gateway configuration
    pub payment: PaymentConfig,
    /// Wait-time prediction oracle configuration
    pub oracle: OracleConfig,
    /// Real-time connection configuration
    pub websocket: WebSocketConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Queue defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Advisory capacity for newly opened queues
    pub default_capacity: u32,
}

/// Which gateway implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    /// In-process gateway for development and tests
    Mock,
    /// Stripe Checkout
    Stripe,
}

impl FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "stripe" => Ok(Self::Stripe),
            other => Err(format!("unknown payment provider: {other}")),
        }
    }
}

/// Payment gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Gateway implementation
    pub provider: PaymentProvider,
    /// Gateway API secret key
    pub secret_key: String,
    /// Webhook signing secret
    pub webhook_secret: String,
    /// ISO currency code for checkout sessions
    pub currency: String,
    /// Redirect after successful checkout (`{REFERENCE}` is substituted)
    pub success_url: String,
    /// Redirect after abandoned checkout
    pub cancel_url: String,
    /// Bound on outbound gateway calls, in seconds
    pub timeout_secs: u64,
    /// Maximum webhook timestamp skew, in seconds
    pub webhook_tolerance_secs: i64,
}

impl PaymentConfig {
    /// Outbound call timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Prediction oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// API key; the oracle is disabled without one
    pub api_key: Option<String>,
    /// API base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Bound on oracle calls, in milliseconds
    pub timeout_ms: u64,
}

impl OracleConfig {
    /// Oracle call timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Real-time connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Concurrent connection limit
    pub max_connections: usize,
    /// Keep-alive ping interval in seconds
    pub ping_interval_secs: u64,
    /// Idle connections are closed after this many seconds
    pub idle_timeout_secs: u64,
    /// Rooms without listeners are dropped this often, in seconds
    pub room_prune_secs: u64,
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first.
    #[must_use]
    pub fn from_env() -> Self {
        // A missing .env file is the normal production case
        let _ = dotenvy::dotenv();

        Self {
            server: ServerConfig {
                host: string_or("HOST", "0.0.0.0"),
                port: var_or("PORT", 8080),
                log_level: string_or("RUST_LOG", "waitline=info,tower_http=debug"),
                metrics_host: string_or("METRICS_HOST", "0.0.0.0"),
                metrics_port: var_or("METRICS_PORT", 9090),
                shutdown_timeout: var_or("SHUTDOWN_TIMEOUT", 30),
            },
            database: env::var("DATABASE_URL").ok().map(|url| DatabaseConfig {
                url,
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: var_or("DATABASE_MIN_CONNECTIONS", 2),
                connect_timeout: var_or("DATABASE_CONNECT_TIMEOUT", 30),
            }),
            queue: QueueConfig {
                default_capacity: var_or("QUEUE_DEFAULT_CAPACITY", 50),
            },
            payment: PaymentConfig {
                provider: var_or("PAYMENT_PROVIDER", PaymentProvider::Mock),
                secret_key: string_or("STRIPE_SECRET_KEY", ""),
                webhook_secret: string_or("STRIPE_WEBHOOK_SECRET", "whsec_dev"),
                currency: string_or("PAYMENT_CURRENCY", "usd"),
                success_url: string_or(
                    "PAYMENT_SUCCESS_URL",
                    "http://localhost:3000/payment/success?ref={REFERENCE}",
                ),
                cancel_url: string_or("PAYMENT_CANCEL_URL", "http://localhost:3000/payment/cancel"),
                timeout_secs: var_or("PAYMENT_TIMEOUT", 10),
                webhook_tolerance_secs: var_or("STRIPE_WEBHOOK_TOLERANCE", 300),
            },
            oracle: OracleConfig {
                api_key: env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty()),
                base_url: string_or("ORACLE_BASE_URL", "https://api.anthropic.com/v1"),
                model: string_or("ORACLE_MODEL", "claude-3-5-haiku-latest"),
                timeout_ms: var_or("ORACLE_TIMEOUT_MS", 3000),
            },
            websocket: WebSocketConfig {
                max_connections: var_or("WS_MAX_CONNECTIONS", 1000),
                ping_interval_secs: var_or("WS_PING_INTERVAL", 30),
                idle_timeout_secs: var_or("WS_IDLE_TIMEOUT", 300),
                room_prune_secs: var_or("WS_ROOM_PRUNE_INTERVAL", 60),
            },
        }
    }
}

impl Default for Config {
    /// Development defaults: in-memory store, mock gateway, no oracle.
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                log_level: "waitline=info".to_string(),
                metrics_host: "127.0.0.1".to_string(),
                metrics_port: 9090,
                shutdown_timeout: 30,
            },
            database: None,
            queue: QueueConfig {
                default_capacity: 50,
            },
            payment: PaymentConfig {
                provider: PaymentProvider::Mock,
                secret_key: String::new(),
                webhook_secret: "whsec_test".to_string(),
                currency: "usd".to_string(),
                success_url: "http://localhost:3000/payment/success?ref={REFERENCE}".to_string(),
                cancel_url: "http://localhost:3000/payment/cancel".to_string(),
                timeout_secs: 10,
                webhook_tolerance_secs: 300,
            },
            oracle: OracleConfig {
                api_key: None,
                base_url: "https://api.anthropic.com/v1".to_string(),
                model: "claude-3-5-haiku-latest".to_string(),
                timeout_ms: 3000,
            },
            websocket: WebSocketConfig {
                max_connections: 1000,
                ping_interval_secs: 30,
                idle_timeout_secs: 300,
                room_prune_secs: 60,
            },
        }
    }
}
