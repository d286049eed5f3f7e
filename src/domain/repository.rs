#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::types::{
    CachedResponse, ChargeRequest, IdempotencyRecord, OutboxEvent, OutboxStatus, Payment,
};
use crate::error::{BusError, StoreError};

/// Transactional store surface for one idempotent charge.
///
/// All methods after `begin` operate on the caller-held transaction so the
/// advisory lock, the row lock on the idempotency record, and the payment +
/// outbox inserts commit or roll back together. Locks are released when the
/// transaction ends.
pub trait ChargeStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Serializes all work for `(scope, key)` within the current transaction,
    /// even before an idempotency row exists. Blocks competing callers;
    /// idempotent within one transaction.
    async fn lock_scope_key(&self, tx: &Self::Tx, scope: &str, key: &str)
    -> Result<(), StoreError>;

    /// Returns the record, if any, holding a row-level write lock for the
    /// rest of the transaction.
    async fn find_record_for_update(
        &self,
        tx: &Self::Tx,
        scope: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Fails with `StoreError::UniqueViolation` if `(scope, key)` exists.
    async fn insert_in_progress(
        &self,
        tx: &Self::Tx,
        record: &IdempotencyRecord,
    ) -> Result<(), StoreError>;

    /// Updates `updated_at` only.
    async fn touch_record(&self, tx: &Self::Tx, id: Uuid) -> Result<(), StoreError>;

    /// Transitions InProgress → Completed and stores the response for replay.
    async fn complete_record(
        &self,
        tx: &Self::Tx,
        id: Uuid,
        http_status: u16,
        response_body: &str,
        payment_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn find_payment_by_key(
        &self,
        tx: &Self::Tx,
        key: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Fails with `StoreError::UniqueViolation` if `idempotency_key` collides.
    async fn insert_payment(&self, tx: &Self::Tx, payment: &Payment) -> Result<(), StoreError>;

    async fn insert_event(&self, tx: &Self::Tx, event: &OutboxEvent) -> Result<(), StoreError>;
}

/// Store surface for the outbox dispatcher.
pub trait OutboxStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Claims up to `limit` events with `status ∈ statuses` whose
    /// `next_attempt_at` is unset or due, ordered by `created_at`, skipping
    /// rows locked by concurrent dispatchers. Claimed rows stay locked for
    /// the rest of the transaction, so two dispatchers always see disjoint
    /// batches.
    async fn claim_batch(
        &self,
        tx: &Self::Tx,
        statuses: &[OutboxStatus],
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEvent>, StoreError>;

    async fn update_event(&self, tx: &Self::Tx, event: &OutboxEvent) -> Result<(), StoreError>;
}

/// Read side for payments.
pub trait PaymentRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;
}

/// Topic-partitioned message bus with acknowledged publish.
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BusError>;
}

/// Read-through accelerator for completed replays (Redis, TTL-bound).
/// Best-effort: callers log failures and fall back to the store.
pub trait ResponseCache: Send + Sync {
    async fn get(&self, scope: &str, key: &str) -> anyhow::Result<Option<CachedResponse>>;
    async fn put(&self, scope: &str, key: &str, response: &CachedResponse) -> anyhow::Result<()>;
}

/// Abstraction over an external payment provider (PSP).
pub trait PaymentProcessor: Send + Sync {
    /// Performs the authorization with the PSP and returns the payment to
    /// persist. Must be idempotent on `idempotency_key`.
    async fn authorize(
        &self,
        idempotency_key: &str,
        request: &ChargeRequest,
    ) -> anyhow::Result<Payment>;
}
