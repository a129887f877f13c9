//! `PostgreSQL` store.
//!
//! Runtime-checked queries (no compile-time database needed). The atomic
//! operations map onto single statements:
//!
//! - number allocation: `UPDATE … RETURNING` on the queue row
//! - quota: one conditional `UPDATE` that resets on a new month and only
//!   increments below the plan limit
//! - payments: `INSERT … ON CONFLICT (transaction_id) DO NOTHING`
//! - ticket updates: `UPDATE … WHERE status = $expected`

use super::{PaymentStore, QueueStore, Result, StoreError, SubscriptionStore, TicketStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use waitline_core::DomainError;
use waitline_core::eta::{OUTLIER_CEILING_MINUTES, ServiceSample};
use waitline_core::subscription::{AdmissionDecision, PlanTier, Subscription};
use waitline_core::types::{
    BookingReference, BusinessId, Cancellation, CancellationActor, Capacity, CustomerId, Money,
    PaymentId, PaymentRecord, PaymentRecordStatus, PaymentStatus, Queue, QueueId, QueueStatus,
    Ticket, TicketId, TicketNumber, TicketStatus,
};

use crate::config::DatabaseConfig;

/// Encode a unit enum as its serde name (`"pending_payment"`, `"follow_up"`)
fn enum_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(StoreError::Corrupt(format!("not a unit enum: {other}"))),
        Err(e) => Err(StoreError::Corrupt(e.to_string())),
    }
}

/// Decode a unit enum from its serde name
fn enum_from_text<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|e| StoreError::Corrupt(format!("{text}: {e}")))
}

#[allow(clippy::cast_possible_wrap)] // Counters and numbers stay far below i32::MAX
const fn to_i32(value: u32) -> i32 {
    value as i32
}

#[allow(clippy::cast_sign_loss)] // Columns are written from unsigned values
const fn to_u32(value: i32) -> u32 {
    if value < 0 { 0 } else { value as u32 }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    business_id: Uuid,
    capacity: i32,
    current_count: i32,
    status: String,
    current_ticket_number: i32,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueRow> for Queue {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self> {
        Ok(Self {
            id: QueueId::from_uuid(row.id),
            business_id: BusinessId::from_uuid(row.business_id),
            capacity: Capacity::new(to_u32(row.capacity)),
            current_count: to_u32(row.current_count),
            status: QueueStatus::parse(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("queue status {}", row.status)))?,
            current_ticket_number: to_u32(row.current_ticket_number),
            opened_at: row.opened_at,
            closed_at: row.closed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    queue_id: Uuid,
    business_id: Uuid,
    customer_id: Option<Uuid>,
    booking_reference: String,
    number: i32,
    service_type: String,
    status: String,
    priority: String,
    payment_status: String,
    payment_method: String,
    price_cents: i64,
    estimated_wait_minutes: Option<i32>,
    expected_service_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    called_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancel_actor: Option<String>,
    cancel_actor_id: Option<Uuid>,
    cancel_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self> {
        let cancellation = match (row.cancel_actor.as_deref(), row.cancelled_at) {
            (Some(actor), Some(cancelled_at)) => Some(Cancellation {
                actor: match (actor, row.cancel_actor_id) {
                    ("customer", Some(id)) => CancellationActor::Customer(CustomerId::from_uuid(id)),
                    ("staff", _) => CancellationActor::Staff,
                    ("system", _) => CancellationActor::System,
                    (other, _) => {
                        return Err(StoreError::Corrupt(format!("cancel actor {other}")));
                    }
                },
                reason: row.cancel_reason,
                cancelled_at,
            }),
            _ => None,
        };

        #[allow(clippy::cast_sign_loss)] // Prices are written from u64
        let price = Money::from_cents(row.price_cents.max(0) as u64);

        Ok(Self {
            id: TicketId::from_uuid(row.id),
            queue_id: QueueId::from_uuid(row.queue_id),
            business_id: BusinessId::from_uuid(row.business_id),
            customer_id: row.customer_id.map(CustomerId::from_uuid),
            booking_reference: BookingReference::new(row.booking_reference),
            number: TicketNumber::new(to_u32(row.number)),
            service_type: enum_from_text(&row.service_type)?,
            status: TicketStatus::parse(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("ticket status {}", row.status)))?,
            priority: enum_from_text(&row.priority)?,
            payment_status: enum_from_text(&row.payment_status)?,
            payment_method: enum_from_text(&row.payment_method)?,
            price,
            estimated_wait_minutes: row.estimated_wait_minutes.map(to_u32),
            expected_service_at: row.expected_service_at,
            created_at: row.created_at,
            called_at: row.called_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancellation,
        })
    }
}

fn cancel_columns(ticket: &Ticket) -> (Option<&'static str>, Option<Uuid>, Option<String>, Option<DateTime<Utc>>) {
    ticket.cancellation.as_ref().map_or((None, None, None, None), |c| {
        let (actor, id) = match c.actor {
            CancellationActor::Customer(id) => ("customer", Some(*id.as_uuid())),
            CancellationActor::Staff => ("staff", None),
            CancellationActor::System => ("system", None),
        };
        (Some(actor), id, c.reason.clone(), Some(c.cancelled_at))
    })
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    ticket_id: Uuid,
    business_id: Uuid,
    payer_id: Option<Uuid>,
    amount_cents: i64,
    transaction_id: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        #[allow(clippy::cast_sign_loss)]
        let amount = Money::from_cents(row.amount_cents.max(0) as u64);
        Ok(Self {
            id: PaymentId::from_uuid(row.id),
            ticket_id: TicketId::from_uuid(row.ticket_id),
            business_id: BusinessId::from_uuid(row.business_id),
            payer: row.payer_id.map(CustomerId::from_uuid),
            amount,
            transaction_id: row.transaction_id,
            status: PaymentRecordStatus::parse(&row.status)
                .ok_or_else(|| StoreError::Corrupt(format!("payment status {}", row.status)))?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    business_id: Uuid,
    plan: String,
    monthly_booking_count: i32,
    last_booking_reset: DateTime<Utc>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            business_id: BusinessId::from_uuid(row.business_id),
            plan: PlanTier::parse(&row.plan),
            monthly_booking_count: to_u32(row.monthly_booking_count),
            last_booking_reset: row.last_booking_reset,
        }
    }
}

const TICKET_COLUMNS: &str = "id, queue_id, business_id, customer_id, booking_reference, number,
    service_type, status, priority, payment_status, payment_method, price_cents,
    estimated_wait_minutes, expected_service_at, created_at, called_at, started_at,
    completed_at, cancel_actor, cancel_actor_id, cancel_reason, cancelled_at";

const QUEUE_COLUMNS: &str = "id, business_id, capacity, current_count, status,
    current_ticket_number, opened_at, closed_at";

/// `PostgreSQL`-backed implementation of every store trait
#[derive(Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connect using the database configuration and run migrations.
    ///
    /// # Errors
    ///
    /// Returns error if the connection or a migration fails.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;

        Ok(Self::new(Arc::new(pool)))
    }

    /// Underlying pool (for readiness checks)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn samples(
        &self,
        business_id: BusinessId,
        since: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<ServiceSample>> {
        let rows: Vec<(DateTime<Utc>, f64)> = sqlx::query_as(
            "SELECT completed_at,
                    EXTRACT(EPOCH FROM (completed_at - called_at))::float8 / 60.0 AS minutes
             FROM tickets
             WHERE business_id = $1
               AND status = 'completed'
               AND called_at IS NOT NULL
               AND completed_at IS NOT NULL
               AND completed_at > called_at
               AND EXTRACT(EPOCH FROM (completed_at - called_at))::float8 / 60.0 <= $2
               AND ($3::timestamptz IS NULL OR completed_at >= $3)
             ORDER BY completed_at DESC
             LIMIT $4",
        )
        .bind(business_id.as_uuid())
        .bind(OUTLIER_CEILING_MINUTES)
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(completed_at, duration_minutes)| ServiceSample {
                completed_at,
                duration_minutes,
            })
            .collect())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl QueueStore for PostgresStore {
    async fn insert_queue(&self, queue: &Queue) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO queues (id, business_id, capacity, current_count, status,
                                 current_ticket_number, opened_at, closed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(queue.id.as_uuid())
        .bind(queue.business_id.as_uuid())
        .bind(to_i32(queue.capacity.get()))
        .bind(to_i32(queue.current_count))
        .bind(queue.status.as_str())
        .bind(to_i32(queue.current_ticket_number))
        .bind(queue.opened_at)
        .bind(queue.closed_at)
        .execute(self.pool.as_ref())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "business {} already has an open queue",
                queue.business_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>> {
        let row: Option<QueueRow> =
            sqlx::query_as(&format!("SELECT {QUEUE_COLUMNS} FROM queues WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(self.pool.as_ref())
                .await?;
        row.map(Queue::try_from).transpose()
    }

    async fn current_queue(&self, business_id: BusinessId) -> Result<Option<Queue>> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queues
             WHERE business_id = $1 AND status <> 'closed'
             ORDER BY opened_at DESC
             LIMIT 1"
        ))
        .bind(business_id.as_uuid())
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(Queue::try_from).transpose()
    }

    async fn update_queue_status(&self, queue: &Queue, expected: QueueStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE queues SET status = $2, closed_at = $3 WHERE id = $1 AND status = $4",
        )
        .bind(queue.id.as_uuid())
        .bind(queue.status.as_str())
        .bind(queue.closed_at)
        .bind(expected.as_str())
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "queue {} is no longer {expected}",
                queue.id
            )));
        }
        Ok(())
    }

    async fn allocate_number(&self, id: QueueId) -> Result<TicketNumber> {
        let number: Option<(i32,)> = sqlx::query_as(
            "UPDATE queues
             SET current_ticket_number = current_ticket_number + 1,
                 current_count = current_count + 1
             WHERE id = $1 AND status = 'active'
             RETURNING current_ticket_number",
        )
        .bind(id.as_uuid())
        .fetch_optional(self.pool.as_ref())
        .await?;

        if let Some((number,)) = number {
            return Ok(TicketNumber::new(to_u32(number)));
        }

        let queue = self.get_queue(id).await?.ok_or(StoreError::NotFound("queue"))?;
        Err(DomainError::QueueNotAcceptingTickets {
            queue_id: id,
            status: queue.status,
        }
        .into())
    }

    async fn release_slot(&self, id: QueueId) -> Result<()> {
        sqlx::query("UPDATE queues SET current_count = GREATEST(current_count - 1, 0) WHERE id = $1")
            .bind(id.as_uuid())
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for PostgresStore {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<()> {
        let (cancel_actor, cancel_actor_id, cancel_reason, cancelled_at) = cancel_columns(ticket);
        let result = sqlx::query(&format!(
            "INSERT INTO tickets ({TICKET_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                     $17, $18, $19, $20, $21, $22)"
        ))
        .bind(ticket.id.as_uuid())
        .bind(ticket.queue_id.as_uuid())
        .bind(ticket.business_id.as_uuid())
        .bind(ticket.customer_id.map(|c| *c.as_uuid()))
        .bind(ticket.booking_reference.as_str())
        .bind(to_i32(ticket.number.get()))
        .bind(enum_text(&ticket.service_type)?)
        .bind(ticket.status.as_str())
        .bind(enum_text(&ticket.priority)?)
        .bind(enum_text(&ticket.payment_status)?)
        .bind(enum_text(&ticket.payment_method)?)
        .bind(i64::try_from(ticket.price.cents()).unwrap_or(i64::MAX))
        .bind(ticket.estimated_wait_minutes.map(to_i32))
        .bind(ticket.expected_service_at)
        .bind(ticket.created_at)
        .bind(ticket.called_at)
        .bind(ticket.started_at)
        .bind(ticket.completed_at)
        .bind(cancel_actor)
        .bind(cancel_actor_id)
        .bind(cancel_reason)
        .bind(cancelled_at)
        .execute(self.pool.as_ref())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "booking reference {} already used",
                ticket.booking_reference
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let row: Option<TicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(self.pool.as_ref())
                .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn find_by_reference(&self, reference: &BookingReference) -> Result<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE booking_reference = $1"
        ))
        .bind(reference.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn update_ticket(
        &self,
        ticket: &Ticket,
        expected_status: TicketStatus,
        expected_payment: PaymentStatus,
    ) -> Result<()> {
        let (cancel_actor, cancel_actor_id, cancel_reason, cancelled_at) = cancel_columns(ticket);
        let result = sqlx::query(
            "UPDATE tickets
             SET status = $2, payment_status = $3, estimated_wait_minutes = $4,
                 expected_service_at = $5, called_at = $6, started_at = $7, completed_at = $8,
                 cancel_actor = $9, cancel_actor_id = $10, cancel_reason = $11, cancelled_at = $12
             WHERE id = $1 AND status = $13 AND payment_status = $14",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.status.as_str())
        .bind(enum_text(&ticket.payment_status)?)
        .bind(ticket.estimated_wait_minutes.map(to_i32))
        .bind(ticket.expected_service_at)
        .bind(ticket.called_at)
        .bind(ticket.started_at)
        .bind(ticket.completed_at)
        .bind(cancel_actor)
        .bind(cancel_actor_id)
        .bind(cancel_reason)
        .bind(cancelled_at)
        .bind(expected_status.as_str())
        .bind(enum_text(&expected_payment)?)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "ticket {} is no longer {expected_status}",
                ticket.id
            )));
        }
        Ok(())
    }

    async fn update_estimate(
        &self,
        id: TicketId,
        minutes: u32,
        expected_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tickets SET estimated_wait_minutes = $2, expected_service_at = $3 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(to_i32(minutes))
        .bind(expected_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn queue_tickets(
        &self,
        queue_id: QueueId,
        statuses: &[TicketStatus],
    ) -> Result<Vec<Ticket>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE queue_id = $1 AND status = ANY($2)
             ORDER BY number ASC"
        ))
        .bind(queue_id.as_uuid())
        .bind(&statuses)
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn customer_tickets(&self, customer_id: CustomerId) -> Result<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE customer_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(customer_id.as_uuid())
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn recent_samples(
        &self,
        business_id: BusinessId,
        limit: usize,
    ) -> Result<Vec<ServiceSample>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.samples(business_id, None, Some(limit)).await
    }

    async fn samples_since(
        &self,
        business_id: BusinessId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ServiceSample>> {
        self.samples(business_id, Some(since), None).await
    }

    async fn delete_ticket(&self, id: TicketId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id.as_uuid())
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn insert_payment(&self, record: &PaymentRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO payments (id, ticket_id, business_id, payer_id, amount_cents,
                                   transaction_id, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(record.id.as_uuid())
        .bind(record.ticket_id.as_uuid())
        .bind(record.business_id.as_uuid())
        .bind(record.payer.map(|p| *p.as_uuid()))
        .bind(i64::try_from(record.amount.cents()).unwrap_or(i64::MAX))
        .bind(&record.transaction_id)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn payments_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<PaymentRecord>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(
            "SELECT id, ticket_id, business_id, payer_id, amount_cents, transaction_id,
                    status, created_at
             FROM payments
             WHERE ticket_id = $1
             ORDER BY created_at ASC",
        )
        .bind(ticket_id.as_uuid())
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter().map(PaymentRecord::try_from).collect()
    }

    async fn set_payment_status(&self, id: PaymentId, status: PaymentRecordStatus) -> Result<()> {
        let result = sqlx::query("UPDATE payments SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(self.pool.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("payment"));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn get_subscription(&self, business_id: BusinessId) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            "SELECT business_id, plan, monthly_booking_count, last_booking_reset
             FROM subscriptions WHERE business_id = $1",
        )
        .bind(business_id.as_uuid())
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(Subscription::from))
    }

    async fn set_plan(
        &self,
        business_id: BusinessId,
        plan: PlanTier,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let row: SubscriptionRow = sqlx::query_as(
            "INSERT INTO subscriptions (business_id, plan, monthly_booking_count, last_booking_reset)
             VALUES ($1, $2, 0, $3)
             ON CONFLICT (business_id) DO UPDATE SET plan = EXCLUDED.plan
             RETURNING business_id, plan, monthly_booking_count, last_booking_reset",
        )
        .bind(business_id.as_uuid())
        .bind(plan.as_str())
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(row.into())
    }

    async fn consume_admission(
        &self,
        business_id: BusinessId,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision> {
        sqlx::query(
            "INSERT INTO subscriptions (business_id, plan, monthly_booking_count, last_booking_reset)
             VALUES ($1, 'basic', 0, $2)
             ON CONFLICT (business_id) DO NOTHING",
        )
        .bind(business_id.as_uuid())
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        // $3..$5 carry the plan limits so they have a single source of truth
        let granted: Option<(String, i32)> = sqlx::query_as(
            "UPDATE subscriptions
             SET monthly_booking_count = CASE
                     WHEN date_trunc('month', last_booking_reset AT TIME ZONE 'UTC')
                        = date_trunc('month', $2::timestamptz AT TIME ZONE 'UTC')
                     THEN monthly_booking_count + 1
                     ELSE 1
                 END,
                 last_booking_reset = CASE
                     WHEN date_trunc('month', last_booking_reset AT TIME ZONE 'UTC')
                        = date_trunc('month', $2::timestamptz AT TIME ZONE 'UTC')
                     THEN last_booking_reset
                     ELSE $2::timestamptz
                 END
             WHERE business_id = $1
               AND (CASE
                        WHEN date_trunc('month', last_booking_reset AT TIME ZONE 'UTC')
                           = date_trunc('month', $2::timestamptz AT TIME ZONE 'UTC')
                        THEN monthly_booking_count
                        ELSE 0
                    END)
                   < (CASE plan WHEN 'pro' THEN $3 WHEN 'enterprise' THEN $4 ELSE $5 END)
             RETURNING plan, monthly_booking_count",
        )
        .bind(business_id.as_uuid())
        .bind(now)
        .bind(to_i32(PlanTier::Pro.monthly_limit()))
        .bind(to_i32(PlanTier::Enterprise.monthly_limit()))
        .bind(to_i32(PlanTier::Basic.monthly_limit()))
        .fetch_optional(self.pool.as_ref())
        .await?;

        if let Some((plan, count)) = granted {
            let limit = PlanTier::parse(&plan).monthly_limit();
            let count = to_u32(count);
            return Ok(AdmissionDecision {
                granted: true,
                count,
                limit,
                remaining: limit.saturating_sub(count),
            });
        }

        let subscription = self
            .get_subscription(business_id)
            .await?
            .ok_or(StoreError::NotFound("subscription"))?;
        let decision = subscription.check(now);
        Err(DomainError::AdmissionDenied {
            count: decision.count,
            limit: decision.limit,
        }
        .into())
    }

    async fn release_admission(
        &self,
        business_id: BusinessId,
        consumed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions
             SET monthly_booking_count = GREATEST(monthly_booking_count - 1, 0)
             WHERE business_id = $1
               AND date_trunc('month', last_booking_reset AT TIME ZONE 'UTC')
                 = date_trunc('month', $2::timestamptz AT TIME ZONE 'UTC')",
        )
        .bind(business_id.as_uuid())
        .bind(consumed_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use waitline_core::types::{PaymentMethod, Priority, ServiceType};

    #[test]
    fn enums_round_trip_through_text() {
        assert_eq!(enum_text(&ServiceType::FollowUp).unwrap(), "follow_up");
        assert_eq!(enum_text(&PaymentMethod::Online).unwrap(), "online");
        let priority: Priority = enum_from_text("urgent").unwrap();
        assert_eq!(priority, Priority::Urgent);
        assert!(enum_from_text::<PaymentStatus>("bogus").is_err());
    }
}
