use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use payments_gateway::config::{IdempotencySettings, OutboxSettings};
use payments_gateway::domain::repository::{
    ChargeStore, EventBus, OutboxStore, ResponseCache,
};
use payments_gateway::domain::types::{
    CachedResponse, ChargeRequest, IdempotencyRecord, IdempotencyStatus, OutboxEvent,
    OutboxStatus, Payment,
};
use payments_gateway::error::{BusError, StoreError};

// ── MemoryChargeStore ────────────────────────────────────────────────────────
//
// In-memory ChargeStore with the same observable semantics as the Postgres
// implementation: a per-(scope,key) async mutex stands in for the advisory
// lock, writes are staged per transaction and applied on commit, and inserts
// fail with UniqueViolation on key collisions.

#[derive(Default)]
struct ChargeState {
    records: Vec<IdempotencyRecord>,
    payments: Vec<Payment>,
    events: Vec<OutboxEvent>,
}

enum Staged {
    InsertRecord(IdempotencyRecord),
    TouchRecord(Uuid, DateTime<Utc>),
    CompleteRecord {
        id: Uuid,
        http_status: u16,
        response_body: String,
        payment_id: Uuid,
        at: DateTime<Utc>,
    },
    InsertPayment(Payment),
    InsertEvent(OutboxEvent),
}

pub struct MemTx {
    advisory_guard: Mutex<Option<OwnedMutexGuard<()>>>,
    staged: Mutex<Vec<Staged>>,
}

#[derive(Clone, Default)]
pub struct MemoryChargeStore {
    state: Arc<Mutex<ChargeState>>,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl MemoryChargeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_record(&self, record: IdempotencyRecord) {
        self.state.lock().unwrap().records.push(record);
    }

    pub fn seed_payment(&self, payment: Payment) {
        self.state.lock().unwrap().payments.push(payment);
    }

    pub fn records(&self) -> Vec<IdempotencyRecord> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.state.lock().unwrap().payments.clone()
    }

    pub fn events(&self) -> Vec<OutboxEvent> {
        self.state.lock().unwrap().events.clone()
    }
}

impl ChargeStore for MemoryChargeStore {
    type Tx = MemTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(MemTx {
            advisory_guard: Mutex::new(None),
            staged: Mutex::new(Vec::new()),
        })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        let staged = tx.staged.into_inner().unwrap();
        let mut state = self.state.lock().unwrap();

        // Unique constraints are validated before anything is applied, so a
        // failed commit leaves the store unchanged.
        for op in &staged {
            match op {
                Staged::InsertRecord(r) => {
                    if state
                        .records
                        .iter()
                        .any(|e| e.scope == r.scope && e.idempotency_key == r.idempotency_key)
                    {
                        return Err(StoreError::UniqueViolation);
                    }
                }
                Staged::InsertPayment(p) => {
                    if state
                        .payments
                        .iter()
                        .any(|e| e.idempotency_key == p.idempotency_key)
                    {
                        return Err(StoreError::UniqueViolation);
                    }
                }
                _ => {}
            }
        }

        for op in staged {
            match op {
                Staged::InsertRecord(r) => state.records.push(r),
                Staged::TouchRecord(id, at) => {
                    if let Some(r) = state.records.iter_mut().find(|r| r.id == id) {
                        r.updated_at = at;
                    }
                }
                Staged::CompleteRecord {
                    id,
                    http_status,
                    response_body,
                    payment_id,
                    at,
                } => {
                    if let Some(r) = state.records.iter_mut().find(|r| r.id == id) {
                        r.status = IdempotencyStatus::Completed;
                        r.http_status = Some(http_status);
                        r.response_body = Some(response_body);
                        r.payment_id = Some(payment_id);
                        r.updated_at = at;
                    }
                }
                Staged::InsertPayment(p) => state.payments.push(p),
                Staged::InsertEvent(e) => state.events.push(e),
            }
        }
        // Advisory lock releases when the guard drops with `tx`.
        Ok(())
    }

    async fn rollback(&self, _tx: Self::Tx) -> Result<(), StoreError> {
        Ok(())
    }

    async fn lock_scope_key(
        &self,
        tx: &Self::Tx,
        scope: &str,
        key: &str,
    ) -> Result<(), StoreError> {
        if tx.advisory_guard.lock().unwrap().is_some() {
            return Ok(());
        }
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(format!("{scope}|{key}"))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        *tx.advisory_guard.lock().unwrap() = Some(guard);
        Ok(())
    }

    async fn find_record_for_update(
        &self,
        _tx: &Self::Tx,
        scope: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|r| r.scope == scope && r.idempotency_key == key)
            .cloned())
    }

    async fn insert_in_progress(
        &self,
        tx: &Self::Tx,
        record: &IdempotencyRecord,
    ) -> Result<(), StoreError> {
        let state = self.state.lock().unwrap();
        if state
            .records
            .iter()
            .any(|r| r.scope == record.scope && r.idempotency_key == record.idempotency_key)
        {
            return Err(StoreError::UniqueViolation);
        }
        drop(state);
        tx.staged
            .lock()
            .unwrap()
            .push(Staged::InsertRecord(record.clone()));
        Ok(())
    }

    async fn touch_record(&self, tx: &Self::Tx, id: Uuid) -> Result<(), StoreError> {
        tx.staged
            .lock()
            .unwrap()
            .push(Staged::TouchRecord(id, Utc::now()));
        Ok(())
    }

    async fn complete_record(
        &self,
        tx: &Self::Tx,
        id: Uuid,
        http_status: u16,
        response_body: &str,
        payment_id: Uuid,
    ) -> Result<(), StoreError> {
        tx.staged.lock().unwrap().push(Staged::CompleteRecord {
            id,
            http_status,
            response_body: response_body.to_owned(),
            payment_id,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn find_payment_by_key(
        &self,
        _tx: &Self::Tx,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .payments
            .iter()
            .find(|p| p.idempotency_key == key)
            .cloned())
    }

    async fn insert_payment(&self, tx: &Self::Tx, payment: &Payment) -> Result<(), StoreError> {
        let state = self.state.lock().unwrap();
        if state
            .payments
            .iter()
            .any(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Err(StoreError::UniqueViolation);
        }
        drop(state);
        tx.staged
            .lock()
            .unwrap()
            .push(Staged::InsertPayment(payment.clone()));
        Ok(())
    }

    async fn insert_event(&self, tx: &Self::Tx, event: &OutboxEvent) -> Result<(), StoreError> {
        tx.staged
            .lock()
            .unwrap()
            .push(Staged::InsertEvent(event.clone()));
        Ok(())
    }
}

// ── MemoryOutboxStore ────────────────────────────────────────────────────────
//
// Emulates skip-locked claiming with a shared claimed-id set: rows claimed by
// an open transaction are invisible to other claimers until commit.

pub struct OutboxTx {
    claimed_here: Mutex<Vec<Uuid>>,
    staged: Mutex<Vec<OutboxEvent>>,
}

#[derive(Clone, Default)]
pub struct MemoryOutboxStore {
    events: Arc<Mutex<Vec<OutboxEvent>>>,
    claimed: Arc<Mutex<HashSet<Uuid>>>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, event: OutboxEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<OutboxEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event(&self, id: Uuid) -> OutboxEvent {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .expect("event not found")
    }
}

impl OutboxStore for MemoryOutboxStore {
    type Tx = OutboxTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(OutboxTx {
            claimed_here: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
        })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        let staged = tx.staged.into_inner().unwrap();
        let claimed_here = tx.claimed_here.into_inner().unwrap();

        let mut events = self.events.lock().unwrap();
        for updated in staged {
            if let Some(slot) = events.iter_mut().find(|e| e.id == updated.id) {
                *slot = updated;
            }
        }
        drop(events);

        let mut claimed = self.claimed.lock().unwrap();
        for id in claimed_here {
            claimed.remove(&id);
        }
        Ok(())
    }

    async fn claim_batch(
        &self,
        tx: &Self::Tx,
        statuses: &[OutboxStatus],
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let events = self.events.lock().unwrap();
        let mut claimed = self.claimed.lock().unwrap();

        let mut due: Vec<OutboxEvent> = events
            .iter()
            .filter(|e| statuses.contains(&e.status))
            .filter(|e| e.next_attempt_at.is_none_or(|at| at <= now))
            .filter(|e| !claimed.contains(&e.id))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(limit as usize);

        let mut claimed_here = tx.claimed_here.lock().unwrap();
        for e in &due {
            claimed.insert(e.id);
            claimed_here.push(e.id);
        }
        Ok(due)
    }

    async fn update_event(&self, tx: &Self::Tx, event: &OutboxEvent) -> Result<(), StoreError> {
        tx.staged.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ── MockBus ──────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockBus {
    calls: Arc<Mutex<Vec<(String, String, String)>>>,
    failures_left: Arc<Mutex<u64>>,
}

impl MockBus {
    /// Bus that acknowledges every publish.
    pub fn acking() -> Self {
        Self::default()
    }

    /// Bus that fails the first `n` publishes, then acknowledges.
    pub fn failing(n: u64) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            failures_left: Arc::new(Mutex::new(n)),
        }
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl EventBus for MockBus {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BusError> {
        self.calls
            .lock()
            .unwrap()
            .push((topic.to_owned(), key.to_owned(), payload.to_owned()));
        let mut failures = self.failures_left.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(BusError("broker unavailable".to_owned()));
        }
        Ok(())
    }
}

// ── MemoryCache ──────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, CachedResponse>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, scope: &str, key: &str, response: CachedResponse) {
        self.entries
            .lock()
            .unwrap()
            .insert(format!("{scope}:{key}"), response);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl ResponseCache for MemoryCache {
    async fn get(&self, scope: &str, key: &str) -> anyhow::Result<Option<CachedResponse>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&format!("{scope}:{key}"))
            .cloned())
    }

    async fn put(&self, scope: &str, key: &str, response: &CachedResponse) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(format!("{scope}:{key}"), response.clone());
        Ok(())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub fn charge_request(amount: i64) -> ChargeRequest {
    ChargeRequest {
        customer_id: "c1".to_owned(),
        amount,
        currency: "PLN".to_owned(),
        payment_method_token: "pm_1".to_owned(),
        description: None,
    }
}

pub fn idempotency_settings() -> IdempotencySettings {
    IdempotencySettings::default()
}

/// Outbox settings with zero backoff so retry tests can tick the dispatcher
/// repeatedly without sleeping.
pub fn fast_outbox_settings() -> OutboxSettings {
    OutboxSettings {
        base_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        ..OutboxSettings::default()
    }
}
