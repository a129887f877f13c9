//! In-memory store for development and tests.
//!
//! A single mutex guards every map, so each trait method is atomic with
//! respect to every other.

use super::{PaymentStore, QueueStore, Result, StoreError, SubscriptionStore, TicketStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use waitline_core::eta::{ServiceSample, is_valid_duration};
use waitline_core::subscription::{AdmissionDecision, PlanTier, Subscription};
use waitline_core::types::{
    BookingReference, BusinessId, CustomerId, PaymentId, PaymentRecord, PaymentRecordStatus,
    PaymentStatus, Queue, QueueId, QueueStatus, Ticket, TicketId, TicketNumber, TicketStatus,
};

#[derive(Default)]
struct Inner {
    queues: HashMap<QueueId, Queue>,
    tickets: HashMap<TicketId, Ticket>,
    references: HashMap<BookingReference, TicketId>,
    payments: HashMap<PaymentId, PaymentRecord>,
    transactions: HashSet<String>,
    subscriptions: HashMap<BusinessId, Subscription>,
    close_before_insert: Option<QueueId>,
}

impl Inner {
    fn samples(&self, business_id: BusinessId) -> Vec<ServiceSample> {
        let mut samples: Vec<ServiceSample> = self
            .tickets
            .values()
            .filter(|t| t.business_id == business_id && t.status == TicketStatus::Completed)
            .filter_map(|t| {
                Some(ServiceSample {
                    completed_at: t.completed_at?,
                    duration_minutes: t.service_duration_minutes()?,
                })
            })
            .filter(|s| is_valid_duration(s.duration_minutes))
            .collect();
        samples.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        samples
    }
}

/// Mutex-guarded in-memory implementation of every store trait
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    fail_ticket_inserts: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `insert_ticket` fail (for failure-path tests)
    pub fn fail_ticket_inserts(&self, fail: bool) {
        self.fail_ticket_inserts.store(fail, Ordering::SeqCst);
    }

    /// Close `queue_id` just before the next ticket for it is inserted, as a
    /// concurrent close would between number allocation and insert
    pub async fn close_queue_before_next_insert(&self, queue_id: QueueId) {
        self.inner.lock().await.close_before_insert = Some(queue_id);
    }

    /// Number of stored payment records
    pub async fn payment_count(&self) -> usize {
        self.inner.lock().await.payments.len()
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn insert_queue(&self, queue: &Queue) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let open_exists = inner
            .queues
            .values()
            .any(|q| q.business_id == queue.business_id && q.status != QueueStatus::Closed);
        if open_exists {
            return Err(StoreError::Conflict(format!(
                "business {} already has an open queue",
                queue.business_id
            )));
        }
        inner.queues.insert(queue.id, queue.clone());
        Ok(())
    }

    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>> {
        Ok(self.inner.lock().await.queues.get(&id).cloned())
    }

    async fn current_queue(&self, business_id: BusinessId) -> Result<Option<Queue>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .queues
            .values()
            .filter(|q| q.business_id == business_id && q.status != QueueStatus::Closed)
            .max_by_key(|q| q.opened_at)
            .cloned())
    }

    async fn update_queue_status(&self, queue: &Queue, expected: QueueStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .queues
            .get_mut(&queue.id)
            .ok_or(StoreError::NotFound("queue"))?;
        if stored.status != expected {
            return Err(StoreError::Conflict(format!(
                "queue {} is {}, expected {expected}",
                queue.id, stored.status
            )));
        }
        stored.status = queue.status;
        stored.closed_at = queue.closed_at;
        Ok(())
    }

    async fn allocate_number(&self, id: QueueId) -> Result<TicketNumber> {
        let mut inner = self.inner.lock().await;
        let queue = inner.queues.get_mut(&id).ok_or(StoreError::NotFound("queue"))?;
        Ok(queue.allocate_number()?)
    }

    async fn release_slot(&self, id: QueueId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let queue = inner.queues.get_mut(&id).ok_or(StoreError::NotFound("queue"))?;
        queue.release_slot();
        Ok(())
    }
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<()> {
        if self.fail_ticket_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("ticket insert"));
        }
        let mut inner = self.inner.lock().await;
        if inner.close_before_insert == Some(ticket.queue_id) {
            inner.close_before_insert = None;
            if let Some(queue) = inner.queues.get_mut(&ticket.queue_id) {
                queue.status = QueueStatus::Closed;
                queue.closed_at = Some(ticket.created_at);
            }
        }
        if inner.references.contains_key(&ticket.booking_reference) {
            return Err(StoreError::Conflict(format!(
                "booking reference {} already used",
                ticket.booking_reference
            )));
        }
        inner
            .references
            .insert(ticket.booking_reference.clone(), ticket.id);
        inner.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.inner.lock().await.tickets.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &BookingReference) -> Result<Option<Ticket>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .references
            .get(reference)
            .and_then(|id| inner.tickets.get(id))
            .cloned())
    }

    async fn update_ticket(
        &self,
        ticket: &Ticket,
        expected_status: TicketStatus,
        expected_payment: PaymentStatus,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .tickets
            .get_mut(&ticket.id)
            .ok_or(StoreError::NotFound("ticket"))?;
        if stored.status != expected_status || stored.payment_status != expected_payment {
            return Err(StoreError::Conflict(format!(
                "ticket {} is {}/{:?}, expected {expected_status}/{expected_payment:?}",
                ticket.id, stored.status, stored.payment_status
            )));
        }
        *stored = ticket.clone();
        Ok(())
    }

    async fn update_estimate(
        &self,
        id: TicketId,
        minutes: u32,
        expected_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner.tickets.get_mut(&id).ok_or(StoreError::NotFound("ticket"))?;
        stored.estimated_wait_minutes = Some(minutes);
        stored.expected_service_at = Some(expected_at);
        Ok(())
    }

    async fn queue_tickets(
        &self,
        queue_id: QueueId,
        statuses: &[TicketStatus],
    ) -> Result<Vec<Ticket>> {
        let inner = self.inner.lock().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.queue_id == queue_id && statuses.contains(&t.status))
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.number);
        Ok(tickets)
    }

    async fn customer_tickets(&self, customer_id: CustomerId) -> Result<Vec<Ticket>> {
        let inner = self.inner.lock().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.customer_id == Some(customer_id))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    async fn recent_samples(
        &self,
        business_id: BusinessId,
        limit: usize,
    ) -> Result<Vec<ServiceSample>> {
        let inner = self.inner.lock().await;
        let mut samples = inner.samples(business_id);
        samples.truncate(limit);
        Ok(samples)
    }

    async fn samples_since(
        &self,
        business_id: BusinessId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ServiceSample>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .samples(business_id)
            .into_iter()
            .filter(|s| s.completed_at >= since)
            .collect())
    }

    async fn delete_ticket(&self, id: TicketId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(ticket) = inner.tickets.remove(&id) else {
            return Ok(false);
        };
        inner.references.remove(&ticket.booking_reference);
        Ok(true)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, record: &PaymentRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.transactions.insert(record.transaction_id.clone()) {
            return Ok(false);
        }
        inner.payments.insert(record.id, record.clone());
        Ok(true)
    }

    async fn payments_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<PaymentRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<PaymentRecord> = inner
            .payments
            .values()
            .filter(|p| p.ticket_id == ticket_id)
            .cloned()
            .collect();
        records.sort_by_key(|p| p.created_at);
        Ok(records)
    }

    async fn set_payment_status(&self, id: PaymentId, status: PaymentRecordStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .payments
            .get_mut(&id)
            .ok_or(StoreError::NotFound("payment"))?;
        record.status = status;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn get_subscription(&self, business_id: BusinessId) -> Result<Option<Subscription>> {
        Ok(self.inner.lock().await.subscriptions.get(&business_id).cloned())
    }

    async fn set_plan(
        &self,
        business_id: BusinessId,
        plan: PlanTier,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut inner = self.inner.lock().await;
        let subscription = inner
            .subscriptions
            .entry(business_id)
            .or_insert_with(|| Subscription::new(business_id, plan, now));
        subscription.plan = plan;
        Ok(subscription.clone())
    }

    async fn consume_admission(
        &self,
        business_id: BusinessId,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision> {
        let mut inner = self.inner.lock().await;
        let subscription = inner
            .subscriptions
            .entry(business_id)
            .or_insert_with(|| Subscription::new(business_id, PlanTier::Basic, now));
        Ok(subscription.try_consume(now)?)
    }

    async fn release_admission(
        &self,
        business_id: BusinessId,
        consumed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(subscription) = inner.subscriptions.get_mut(&business_id) {
            subscription.release(consumed_at);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use waitline_core::DomainError;
    use waitline_core::types::Capacity;

    fn queue() -> Queue {
        Queue::open(QueueId::new(), BusinessId::new(), Capacity::new(5), Utc::now())
    }

    #[tokio::test]
    async fn second_open_queue_for_business_conflicts() {
        let store = InMemoryStore::new();
        let first = queue();
        store.insert_queue(&first).await.unwrap();

        let mut second = queue();
        second.business_id = first.business_id;
        assert!(matches!(
            store.insert_queue(&second).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn allocation_refuses_paused_queue() {
        let store = InMemoryStore::new();
        let mut q = queue();
        store.insert_queue(&q).await.unwrap();
        assert_eq!(store.allocate_number(q.id).await.unwrap(), TicketNumber::new(1));

        q.status = QueueStatus::Paused;
        store.update_queue_status(&q, QueueStatus::Active).await.unwrap();

        assert!(matches!(
            store.allocate_number(q.id).await,
            Err(StoreError::Domain(DomainError::QueueNotAcceptingTickets { .. }))
        ));
    }

    #[tokio::test]
    async fn duplicate_transaction_is_not_inserted() {
        let store = InMemoryStore::new();
        let record = PaymentRecord {
            id: PaymentId::new(),
            ticket_id: TicketId::new(),
            business_id: BusinessId::new(),
            payer: None,
            amount: waitline_core::types::Money::from_cents(500),
            transaction_id: "txn_1".to_string(),
            status: PaymentRecordStatus::Completed,
            created_at: Utc::now(),
        };
        assert!(store.insert_payment(&record).await.unwrap());

        let replay = PaymentRecord {
            id: PaymentId::new(),
            ..record
        };
        assert!(!store.insert_payment(&replay).await.unwrap());
        assert_eq!(store.payment_count().await, 1);
    }
}
