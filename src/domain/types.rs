use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request payload for charging a payment. Field names follow the JSON wire
/// format; the request hash is computed over the canonical form of this
/// exact shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub customer_id: String,
    /// Amount in minor units.
    pub amount: i64,
    pub currency: String,
    pub payment_method_token: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ChargeRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.customer_id.trim().is_empty() {
            return Err("customerId must not be blank".to_owned());
        }
        if self.amount <= 0 {
            return Err("amount must be positive".to_owned());
        }
        if self.currency.trim().is_empty() {
            return Err("currency must not be blank".to_owned());
        }
        if self.payment_method_token.trim().is_empty() {
            return Err("paymentMethodToken must not be blank".to_owned());
        }
        Ok(())
    }
}

/// Allowed character class and length for client-supplied idempotency keys.
pub fn validate_idempotency_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

// ── Payment ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Authorized,
    Captured,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "AUTHORIZED",
            Self::Captured => "CAPTURED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AUTHORIZED" => Some(Self::Authorized),
            "CAPTURED" => Some(Self::Captured),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The business fact of a charge. Created exactly once per accepted charge,
/// never updated, never deleted.
#[derive(Debug, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub idempotency_key: String,
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_method_token: String,
    pub description: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn authorized(idempotency_key: &str, request: &ChargeRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.to_owned(),
            customer_id: request.customer_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            payment_method_token: request.payment_method_token.clone(),
            description: request.description.clone(),
            status: PaymentStatus::Authorized,
            created_at: Utc::now(),
        }
    }
}

/// Response returned for a charge request and stored verbatim for replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub customer_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentResponse {
    pub fn from_payment(p: &Payment) -> Self {
        Self {
            payment_id: p.id,
            status: p.status.as_str().to_owned(),
            amount: p.amount,
            currency: p.currency.clone(),
            customer_id: p.customer_id.clone(),
            description: p.description.clone(),
            created_at: p.created_at,
        }
    }
}

// ── Idempotency record ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Coordinator state for one `(scope, idempotency_key)`.
///
/// Same (scope, key) + same request hash replays the stored response; same
/// (scope, key) + different hash is a conflict.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub scope: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn in_progress(scope: &str, key: &str, request_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scope: scope.to_owned(),
            idempotency_key: key.to_owned(),
            request_hash: request_hash.to_owned(),
            status: IdempotencyStatus::InProgress,
            http_status: None,
            response_body: None,
            payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn matches_hash(&self, incoming_hash: &str) -> bool {
        self.request_hash == incoming_hash
    }

    /// True iff the record is InProgress and has not been touched for longer
    /// than `max_age`. Such a record usually means a process crashed between
    /// insert and completion and may be recovered under the advisory lock.
    pub fn is_stale_in_progress(&self, max_age: Duration) -> bool {
        if self.status != IdempotencyStatus::InProgress {
            return false;
        }
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return false;
        };
        let reference = self.updated_at.max(self.created_at);
        reference < Utc::now() - max_age
    }
}

// ── Outbox event ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    New,
    Retry,
    Sent,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Retry => "RETRY",
            Self::Sent => "SENT",
            Self::Dead => "DEAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "RETRY" => Some(Self::Retry),
            "SENT" => Some(Self::Sent),
            "DEAD" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Terminal states are never re-claimed by the dispatcher.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }
}

/// One pending delivery to the bus, written in the same transaction as the
/// payment it describes.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_key: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        event_key: &str,
        payload: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
            event_type: event_type.to_owned(),
            event_key: event_key.to_owned(),
            payload,
            status: OutboxStatus::New,
            attempt_count: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Sent;
        self.sent_at = Some(now);
        self.updated_at = now;
        self.next_attempt_at = None;
        self.last_error = None;
    }

    pub fn mark_retry(&mut self, error: String, backoff: Duration, now: DateTime<Utc>) {
        self.status = OutboxStatus::Retry;
        self.attempt_count += 1;
        self.last_error = Some(error);
        self.next_attempt_at = chrono::Duration::from_std(backoff)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
        self.updated_at = now;
    }

    pub fn mark_dead(&mut self, error: String, now: DateTime<Utc>) {
        self.status = OutboxStatus::Dead;
        self.attempt_count += 1;
        self.last_error = Some(error);
        self.next_attempt_at = None;
        self.updated_at = now;
    }
}

/// Event published to Kafka when a payment is authorized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChargedEvent {
    pub schema_version: String,
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payment_id: Uuid,
    pub idempotency_key: String,
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub description: Option<String>,
}

impl PaymentChargedEvent {
    pub fn from_payment(payment: &Payment) -> Self {
        Self {
            schema_version: "1".to_owned(),
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            payment_id: payment.id,
            idempotency_key: payment.idempotency_key.clone(),
            customer_id: payment.customer_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status.as_str().to_owned(),
            description: payment.description.clone(),
        }
    }
}

/// Cached `(scope, key)` response for completed replays. Not authoritative;
/// a miss is always resolved against the idempotency store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub request_hash: String,
    pub http_status: u16,
    pub response_body: String,
}
