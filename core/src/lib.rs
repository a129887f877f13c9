//! # Waitline Core
//!
//! Domain model and pure business logic for the Waitline virtual queue.
//!
//! Walk-in service providers (clinics, banks, shops) run a virtual waiting
//! line: customers reserve a numbered ticket remotely, staff call, serve and
//! skip tickets, and both sides see live status. This crate holds everything
//! about that lifecycle that can be expressed without I/O:
//!
//! - **Queue Register** ([`queue`]): daily sequencing context, status machine
//!   and ticket number allocation.
//! - **Lifecycle Engine** ([`ticket`]): the ticket state machine and the
//!   effects every transition produces.
//! - **Admission Gate** ([`subscription`]): monthly plan quota arithmetic.
//! - **ETA Estimator** ([`eta`]): the deterministic hybrid wait-time model.
//! - **Fan-out vocabulary** ([`events`]): rooms and real-time event payloads.
//!
//! ## Core Concepts
//!
//! - **State**: the record a reducer owns (a queue, a ticket)
//! - **Action**: every input to a reducer
//! - **Reducer**: `(State, Action, Environment) → Result<Effects, Error>`
//! - **Effect**: a description of a side effect (broadcast, notification,
//!   email), executed later by the service runtime
//! - **Environment**: injected dependencies such as the [`environment::Clock`]
//!
//! A reducer that returns an error must leave its state untouched, so the
//! service layer can persist the state only when the reducer succeeds.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use waitline_core::environment::SystemClock;
//! use waitline_core::queue::{QueueAction, QueueEnvironment, QueueReducer};
//! use waitline_core::reducer::Reducer;
//! use waitline_core::types::{BusinessId, Capacity, Queue, QueueId, QueueStatus};
//! use chrono::Utc;
//!
//! let mut queue = Queue::open(QueueId::new(), BusinessId::new(), Capacity::new(50), Utc::now());
//! let env = QueueEnvironment::new(Arc::new(SystemClock));
//!
//! let effects = QueueReducer::new()
//!     .reduce(&mut queue, QueueAction::Pause, &env)
//!     .unwrap();
//!
//! assert_eq!(queue.status, QueueStatus::Paused);
//! assert_eq!(effects.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod eta;
pub mod events;
pub mod queue;
pub mod subscription;
pub mod ticket;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::DomainError;
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all lifecycle rules and are deterministic and testable.
pub mod reducer {
    use super::effect::Effects;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The record this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Error`: The rejection returned for invalid actions
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for QueueReducer {
    ///     type State = Queue;
    ///     type Action = QueueAction;
    ///     type Environment = QueueEnvironment;
    ///     type Error = DomainError;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut Queue,
    ///         action: QueueAction,
    ///         env: &QueueEnvironment,
    ///     ) -> Result<Effects, DomainError> {
    ///         // Validate, then mutate, then describe effects
    ///         Ok(Effects::new())
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The error returned when an action is rejected
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is not valid for the current
        /// state. In that case `state` is left exactly as it was.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Effects, Self::Error>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the service runtime after
/// the new state has been persisted. They are values, not execution, which
/// keeps reducers pure and lets tests assert on exactly what would happen.
pub mod effect {
    use crate::events::{EmailRequest, Notification, QueueEvent, Room};
    use smallvec::SmallVec;

    /// Effects returned by a single reducer call.
    pub type Effects = SmallVec<[Effect; 4]>;

    /// Effect type - describes a side effect to be executed
    ///
    /// Delivery of every effect is best-effort: a failed broadcast or email
    /// never undoes the state change that produced it.
    #[derive(Clone, Debug, PartialEq)]
    pub enum Effect {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect>),

        /// Broadcast an event to everyone joined to a room
        Publish {
            /// Target room
            room: Room,
            /// Event payload
            event: Box<QueueEvent>,
        },

        /// Persist an in-app notification record
        Notify(Notification),

        /// Send a transactional email
        Email(EmailRequest),
    }

    impl Effect {
        /// Broadcast `event` to `room`
        #[must_use]
        pub fn publish(room: Room, event: QueueEvent) -> Self {
            Self::Publish {
                room,
                event: Box::new(event),
            }
        }

        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect>) -> Self {
            Self::Parallel(effects)
        }

        /// Flatten nested `Parallel` effects and drop `None`s.
        #[must_use]
        pub fn flatten(self) -> Vec<Effect> {
            match self {
                Self::None => Vec::new(),
                Self::Parallel(effects) => effects.into_iter().flat_map(Self::flatten).collect(),
                other => vec![other],
            }
        }

        /// Rooms this effect publishes to (empty for non-broadcast effects).
        #[must_use]
        pub fn rooms(&self) -> Vec<&Room> {
            match self {
                Self::Publish { room, .. } => vec![room],
                Self::Parallel(effects) => effects.iter().flat_map(Self::rooms).collect(),
                _ => Vec::new(),
            }
        }
    }

    /// Collect effects into the reducer return type.
    #[must_use]
    pub fn effects<I: IntoIterator<Item = Effect>>(iter: I) -> Effects {
        iter.into_iter().collect::<SmallVec<_>>()
    }
}

/// Environment module - Dependency injection traits
///
/// All non-deterministic inputs are abstracted behind traits and injected via
/// the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Month rollover of the admission quota and every lifecycle timestamp
    /// read the clock through this trait.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
