//! Effect execution.
//!
//! Reducers describe side effects; the [`EffectRunner`] performs them after
//! the state change has been persisted. Broadcasts go out inline (they only
//! touch in-process channels), notifications and emails are spawned. No
//! effect failure is ever reported back to the caller.

use crate::collaborators::{Mailer, NotificationSink};
use crate::fanout::RoomBroadcaster;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use waitline_core::effect::{Effect, Effects};

/// Decrements the pending counter when a spawned effect finishes
struct PendingGuard {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Executes reducer effects against the real collaborators
#[derive(Clone)]
pub struct EffectRunner {
    broadcaster: RoomBroadcaster,
    mailer: Arc<dyn Mailer>,
    notifications: Arc<dyn NotificationSink>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl EffectRunner {
    /// Create a runner
    #[must_use]
    pub fn new(
        broadcaster: RoomBroadcaster,
        mailer: Arc<dyn Mailer>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            broadcaster,
            mailer,
            notifications,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// The broadcaster effects publish to
    #[must_use]
    pub const fn broadcaster(&self) -> &RoomBroadcaster {
        &self.broadcaster
    }

    /// Execute every effect. Returns once broadcasts are delivered; deliveries
    /// to external collaborators continue in the background.
    pub async fn run(&self, effects: Effects) {
        for effect in effects.into_iter().flat_map(Effect::flatten) {
            self.execute(effect).await;
        }
    }

    async fn execute(&self, effect: Effect) {
        match effect {
            Effect::None | Effect::Parallel(_) => {}
            Effect::Publish { room, event } => {
                let name = event.name();
                let delivered = self.broadcaster.publish(&room, *event).await;
                tracing::trace!(%room, event = name, delivered, "Published");
            }
            Effect::Notify(notification) => {
                let sink = Arc::clone(&self.notifications);
                self.spawn(async move {
                    if let Err(e) = sink.persist(&notification).await {
                        tracing::warn!(
                            recipient = %notification.recipient,
                            error = %e,
                            "Failed to persist notification"
                        );
                    }
                });
            }
            Effect::Email(email) => {
                let mailer = Arc::clone(&self.mailer);
                self.spawn(async move {
                    if let Err(e) = mailer.send(&email).await {
                        tracing::warn!(
                            recipient = %email.recipient,
                            subject = %email.subject,
                            error = %e,
                            "Failed to send email"
                        );
                    }
                });
            }
        }
    }

    fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            idle: Arc::clone(&self.idle),
        };
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    /// Background deliveries still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every background delivery has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
