//! Queue Register: one live queue per business.

use crate::engine::{EngineError, LifecycleEngine, Result};
use crate::store::StoreError;
use std::sync::Arc;
use waitline_core::environment::Clock;
use waitline_core::queue::{QueueAction, QueueEnvironment, QueueReducer};
use waitline_core::reducer::Reducer;
use waitline_core::types::{
    BusinessId, CancellationActor, Capacity, Queue, QueueId, QueueStatus, TicketStatus,
};

/// Reason recorded on tickets cancelled by closing their queue
pub const QUEUE_CLOSED_REASON: &str = "queue closed";

/// Opens, pauses, resumes and closes queues
#[derive(Clone)]
pub struct QueueRegister {
    engine: LifecycleEngine,
    reducer: QueueReducer,
    env: QueueEnvironment,
    default_capacity: Capacity,
}

impl QueueRegister {
    /// Create a register on top of the lifecycle engine
    #[must_use]
    pub fn new(engine: LifecycleEngine, default_capacity: u32) -> Self {
        let clock: Arc<dyn Clock> = Arc::clone(engine.clock());
        Self {
            engine,
            reducer: QueueReducer::new(),
            env: QueueEnvironment::new(clock),
            default_capacity: Capacity::new(default_capacity),
        }
    }

    /// Open a queue for a business, or return the one already open.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn open(&self, business_id: BusinessId, capacity: Option<u32>) -> Result<Queue> {
        let store = self.engine.store();
        if let Some(existing) = store.current_queue(business_id).await? {
            return Ok(existing);
        }

        let capacity = capacity.map_or(self.default_capacity, Capacity::new);
        let queue = Queue::open(QueueId::new(), business_id, capacity, self.env.clock.now());
        match store.insert_queue(&queue).await {
            Ok(()) => {
                tracing::info!(queue_id = %queue.id, capacity = capacity.get(), "Queue opened");
                self.engine.runner().run(QueueReducer::announce(&queue)).await;
                Ok(queue)
            }
            // Lost a race with a concurrent open: return the winner
            Err(StoreError::Conflict(_)) => store
                .current_queue(business_id)
                .await?
                .ok_or(EngineError::NotFound("queue")),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop accepting bookings.
    ///
    /// # Errors
    ///
    /// Returns [`waitline_core::DomainError::InvalidQueueTransition`] unless the queue is active.
    pub async fn pause(&self, queue_id: QueueId) -> Result<Queue> {
        self.transition(queue_id, QueueAction::Pause).await
    }

    /// Accept bookings again.
    ///
    /// # Errors
    ///
    /// Returns [`waitline_core::DomainError::InvalidQueueTransition`] unless the queue is paused.
    pub async fn resume(&self, queue_id: QueueId) -> Result<Queue> {
        self.transition(queue_id, QueueAction::Resume).await
    }

    /// Close the queue and cancel every ticket still in it.
    ///
    /// # Errors
    ///
    /// Returns [`waitline_core::DomainError::InvalidQueueTransition`] for an
    /// already closed queue.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self, queue_id: QueueId) -> Result<Queue> {
        let queue = self.transition(queue_id, QueueAction::Close).await?;

        let open_tickets = self
            .engine
            .store()
            .queue_tickets(
                queue_id,
                &[
                    TicketStatus::PendingPayment,
                    TicketStatus::Waiting,
                    TicketStatus::Called,
                    TicketStatus::InProgress,
                ],
            )
            .await?;

        let mut cancelled = 0usize;
        for ticket in open_tickets {
            match self
                .engine
                .cancel(
                    ticket.id,
                    CancellationActor::System,
                    Some(QUEUE_CLOSED_REASON.to_string()),
                )
                .await
            {
                Ok(_) => cancelled += 1,
                Err(e) => {
                    tracing::warn!(ticket_id = %ticket.id, error = %e, "Ticket not cancelled on close");
                }
            }
        }

        tracing::info!(%queue_id, cancelled, "Queue closed");
        Ok(queue)
    }

    /// Load a queue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown queue.
    pub async fn get(&self, queue_id: QueueId) -> Result<Queue> {
        self.engine
            .store()
            .get_queue(queue_id)
            .await?
            .ok_or(EngineError::NotFound("queue"))
    }

    /// The business's open queue, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn current(&self, business_id: BusinessId) -> Result<Option<Queue>> {
        Ok(self.engine.store().current_queue(business_id).await?)
    }

    async fn transition(&self, queue_id: QueueId, action: QueueAction) -> Result<Queue> {
        let mut queue = self.get(queue_id).await?;
        let expected: QueueStatus = queue.status;
        let effects = self.reducer.reduce(&mut queue, action, &self.env)?;

        self.engine
            .store()
            .update_queue_status(&queue, expected)
            .await?;
        tracing::info!(%queue_id, from = %expected, to = %queue.status, "Queue status changed");

        self.engine.runner().run(effects).await;
        Ok(queue)
    }
}
