//! HTTP API handlers, organized by area:
//! - Bookings: booking intake, ticket reads and staff transitions
//! - Queues: dashboard, arrival estimate, queue status, quota and plan
//! - Payments: gateway webhook, session confirmation, refunds
//! - Events: business directory relay
//! - Notifications: in-app notification inbox
//! - WebSocket: live room updates

pub mod bookings;
pub mod error;
pub mod events;
pub mod identity;
pub mod notifications;
pub mod payments;
pub mod queues;
pub mod websocket;

pub use error::AppError;
pub use identity::{CUSTOMER_HEADER, Caller, Customer};
pub use websocket::active_connection_count;
