//! Queue Register state machine.
//!
//! `active ⇄ paused`, `{active, paused} → closed`. Closing is terminal; a
//! business that reopens gets a brand-new [`Queue`] with reset counters.
//! Number allocation lives on [`Queue::allocate_number`] because stores run it
//! under their own atomicity guarantees rather than through a reducer call.

use crate::effect::{Effect, Effects};
use crate::environment::Clock;
use crate::error::DomainError;
use crate::events::{QueueEvent, Room};
use crate::reducer::Reducer;
use crate::types::{Queue, QueueStatus};
use smallvec::smallvec;
use std::sync::Arc;

// ============================================================================
// Actions
// ============================================================================

/// Actions for the Queue Register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueAction {
    /// Stop accepting bookings for now
    Pause,
    /// Accept bookings again
    Resume,
    /// Finish the day
    Close,
}

impl QueueAction {
    const fn verb(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Close => "close",
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the Queue Register
#[derive(Clone)]
pub struct QueueEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
}

impl QueueEnvironment {
    /// Creates a new `QueueEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for queue status changes
#[derive(Clone, Debug, Default)]
pub struct QueueReducer;

impl QueueReducer {
    /// Creates a new `QueueReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Status broadcast to the business room; also sent when a queue opens
    #[must_use]
    pub fn announce(queue: &Queue) -> Effects {
        smallvec![Effect::publish(
            Room::Business(queue.business_id),
            QueueEvent::QueueUpdated {
                queue: queue.clone(),
                positions: Vec::new(),
            },
        )]
    }

    fn target(from: QueueStatus, action: QueueAction) -> Result<QueueStatus, DomainError> {
        match (from, action) {
            (QueueStatus::Active, QueueAction::Pause) => Ok(QueueStatus::Paused),
            (QueueStatus::Paused, QueueAction::Resume) => Ok(QueueStatus::Active),
            (QueueStatus::Active | QueueStatus::Paused, QueueAction::Close) => {
                Ok(QueueStatus::Closed)
            }
            (from, action) => Err(DomainError::InvalidQueueTransition {
                from,
                action: action.verb(),
            }),
        }
    }
}

impl Reducer for QueueReducer {
    type State = Queue;
    type Action = QueueAction;
    type Environment = QueueEnvironment;
    type Error = DomainError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects, Self::Error> {
        let status = Self::target(state.status, action)?;

        state.status = status;
        if status == QueueStatus::Closed {
            state.closed_at = Some(env.clock.now());
        }

        Ok(Self::announce(state))
    }
}
