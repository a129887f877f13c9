//! Application state for the HTTP server.
//!
//! Holds the services every handler needs. Cloning is cheap: each service is
//! itself a bundle of `Arc`s.

use crate::admission::AdmissionGate;
use crate::collaborators::{Mailer, NotificationSink};
use crate::config::Config;
use crate::engine::LifecycleEngine;
use crate::estimator::{EtaEstimator, PredictionOracle};
use crate::fanout::RoomBroadcaster;
use crate::payment_gateway::PaymentGateway;
use crate::reconciler::PaymentReconciler;
use crate::register::QueueRegister;
use crate::runtime::EffectRunner;
use crate::store::Store;
use sqlx::PgPool;
use std::sync::Arc;
use waitline_core::environment::Clock;

/// External dependencies the services are built from
pub struct Dependencies {
    /// Persistence
    pub store: Arc<dyn Store>,
    /// `PostgreSQL` pool behind `store`, checked by the readiness probe
    pub database: Option<PgPool>,
    /// Payment gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Wait-time prediction oracle
    pub oracle: Arc<dyn PredictionOracle>,
    /// Transactional email
    pub mailer: Arc<dyn Mailer>,
    /// In-app notifications
    pub notifications: Arc<dyn NotificationSink>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<Config>,
    /// Ticket lifecycle
    pub engine: LifecycleEngine,
    /// Queue open/pause/resume/close
    pub register: QueueRegister,
    /// Monthly quota
    pub admission: AdmissionGate,
    /// Gateway settlement and refunds
    pub reconciler: PaymentReconciler,
    /// Real-time rooms
    pub broadcaster: RoomBroadcaster,
    /// In-app notifications
    pub notifications: Arc<dyn NotificationSink>,
    /// Database pool, when running on `PostgreSQL`
    pub database: Option<PgPool>,
}

impl AppState {
    /// Wire the services together.
    #[must_use]
    pub fn new(config: Config, deps: Dependencies) -> Self {
        let broadcaster = RoomBroadcaster::new();
        let runner = EffectRunner::new(
            broadcaster.clone(),
            deps.mailer,
            Arc::clone(&deps.notifications),
        );
        let estimator = EtaEstimator::new(
            Arc::clone(&deps.store),
            deps.oracle,
            Arc::clone(&deps.clock),
            config.oracle.timeout(),
        );
        let engine = LifecycleEngine::new(
            Arc::clone(&deps.store),
            estimator,
            deps.gateway,
            runner,
            Arc::clone(&deps.clock),
            config.payment.timeout(),
        );

        Self {
            register: QueueRegister::new(engine.clone(), config.queue.default_capacity),
            admission: AdmissionGate::new(deps.store, deps.clock),
            reconciler: PaymentReconciler::new(engine.clone()),
            engine,
            broadcaster,
            notifications: deps.notifications,
            database: deps.database,
            config: Arc::new(config),
        }
    }
}
