//! # Waitline
//!
//! Virtual queue service for walk-in businesses. Customers book a numbered
//! ticket remotely, staff call and serve tickets, and both sides follow the
//! line live.
//!
//! # Architecture
//!
//! ```text
//!   HTTP / WebSocket (api, server)
//!          │
//!          ▼
//! ┌────────────────┐ ┌────────────────┐ ┌────────────────┐ ┌────────────────┐
//! │ QueueRegister  │ │ LifecycleEngine│ │ AdmissionGate  │ │PaymentReconciler│
//! └────────────────┘ └────────────────┘ └────────────────┘ └────────────────┘
//!          │                 │                  │                  │
//!          └──── reducers (waitline-core) ──────┴───── Store ──────┘
//!                            │
//!                         Effects
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │ EffectRunner │──► RoomBroadcaster (rooms)
//!                     └──────────────┘──► Mailer / NotificationSink
//! ```
//!
//! Every mutation runs the pure reducer first, persists the new state with a
//! conditional store write, and only then executes the reducer's effects.
//! A rejected transition or failed write leaves no trace.
//!
//! # Stores
//!
//! [`store::InMemoryStore`] runs tests and local development;
//! [`store::PostgresStore`] is used when `DATABASE_URL` is set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod api;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod estimator;
pub mod fanout;
pub mod metrics;
pub mod payment_gateway;
pub mod reconciler;
pub mod register;
pub mod runtime;
pub mod server;
pub mod store;

pub use admission::AdmissionGate;
pub use config::Config;
pub use engine::{BookingOutcome, BookingRequest, EngineError, LifecycleEngine, QueueSnapshot};
pub use estimator::{ClaudeOracle, EtaEstimator, NoOracle, PredictionOracle};
pub use fanout::RoomBroadcaster;
pub use reconciler::{PaymentReconciler, Settlement};
pub use register::QueueRegister;
pub use runtime::EffectRunner;
pub use server::{AppState, Dependencies, build_router};
