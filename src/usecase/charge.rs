use tracing::warn;
use uuid::Uuid;

use crate::config::IdempotencySettings;
use crate::domain::repository::{ChargeStore, PaymentProcessor, ResponseCache};
use crate::domain::types::{
    CachedResponse, ChargeRequest, IdempotencyRecord, IdempotencyStatus, OutboxEvent, Payment,
    PaymentChargedEvent, PaymentResponse,
};
use crate::error::{GatewayError, StoreError};

/// HTTP status stored and replayed for successful charges.
const CREATED: u16 = 201;

pub struct ChargeInput {
    pub idempotency_key: String,
    /// Base64(SHA-256(canonical JSON)) of the request, computed at the edge.
    pub request_hash: String,
    pub request: ChargeRequest,
}

#[derive(Debug)]
pub struct ChargeOutcome {
    pub http_status: u16,
    pub body: String,
    pub replayed: bool,
}

/// Internal result of one transactional attempt. A lost race on a unique
/// constraint aborts the transaction and re-enters the read path once; the
/// second attempt sees the winner's committed state.
enum TxError {
    Race,
    Fail(GatewayError),
}

impl From<StoreError> for TxError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation => TxError::Race,
            StoreError::Backend(e) => TxError::Fail(GatewayError::Internal(e)),
        }
    }
}

impl From<GatewayError> for TxError {
    fn from(e: GatewayError) -> Self {
        TxError::Fail(e)
    }
}

/// Transaction orchestrator for the idempotent charge operation.
///
/// One database transaction per attempt: advisory lock on `(scope, key)`,
/// row lock on the idempotency record, then replay / conflict / execute.
/// The payment, its outbox event and the record completion commit together.
pub struct ChargeUseCase<S, C, P>
where
    S: ChargeStore,
    C: ResponseCache,
    P: PaymentProcessor,
{
    pub store: S,
    pub cache: C,
    pub processor: P,
    pub settings: IdempotencySettings,
}

impl<S, C, P> ChargeUseCase<S, C, P>
where
    S: ChargeStore,
    C: ResponseCache,
    P: PaymentProcessor,
{
    pub async fn execute(&self, input: ChargeInput) -> Result<ChargeOutcome, GatewayError> {
        let scope = self.settings.charge_scope.as_str();
        let key = input.idempotency_key.as_str();

        // Fast path: cached completed response. Authority stays with the
        // store; a miss or cache failure falls through to the transaction.
        match self.cache.get(scope, key).await {
            Ok(Some(cached)) => {
                if cached.request_hash != input.request_hash {
                    return Err(GatewayError::HashConflict(key.to_owned()));
                }
                return Ok(ChargeOutcome {
                    http_status: cached.http_status,
                    body: cached.response_body,
                    replayed: true,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "response cache read failed, falling back to store"),
        }

        // At most one retry: a unique violation means a concurrent winner
        // committed, and the next attempt resolves to a replay or conflict.
        for _ in 0..2 {
            match self.charge_in_tx(key, &input.request_hash, &input.request).await {
                Ok(outcome) => return Ok(outcome),
                Err(TxError::Race) => continue,
                Err(TxError::Fail(e)) => return Err(e),
            }
        }
        Err(GatewayError::Internal(anyhow::anyhow!(
            "idempotency race for key '{key}' did not settle after retry"
        )))
    }

    async fn charge_in_tx(
        &self,
        key: &str,
        request_hash: &str,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, TxError> {
        let tx = self.store.begin().await?;
        match self.charge_locked(&tx, key, request_hash, request).await {
            Ok(outcome) => {
                self.store.commit(tx).await?;
                // The record is Completed in the store now; populate the
                // cache best-effort.
                let cached = CachedResponse {
                    request_hash: request_hash.to_owned(),
                    http_status: outcome.http_status,
                    response_body: outcome.body.clone(),
                };
                if let Err(e) = self
                    .cache
                    .put(&self.settings.charge_scope, key, &cached)
                    .await
                {
                    warn!(error = %e, "response cache write failed");
                }
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = self.store.rollback(tx).await {
                    warn!(error = %rollback_err, "rollback after failed charge attempt");
                }
                Err(e)
            }
        }
    }

    /// The body of the transaction. Runs with the advisory lock held, so at
    /// most one request per `(scope, key)` makes progress past the first
    /// await.
    async fn charge_locked(
        &self,
        tx: &S::Tx,
        key: &str,
        request_hash: &str,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, TxError> {
        let scope = self.settings.charge_scope.as_str();

        self.store.lock_scope_key(tx, scope, key).await?;

        let existing = self.store.find_record_for_update(tx, scope, key).await?;

        let record_id = match existing {
            Some(record) => {
                if !record.matches_hash(request_hash) {
                    return Err(GatewayError::HashConflict(key.to_owned()).into());
                }

                if record.status == IdempotencyStatus::Completed {
                    return Ok(ChargeOutcome {
                        http_status: record.http_status.unwrap_or(CREATED),
                        body: record.response_body.unwrap_or_default(),
                        replayed: true,
                    });
                }

                // InProgress. Non-stale records should not be observable here
                // because the advisory lock serializes callers; stay defensive
                // and tell the client to retry.
                if !record.is_stale_in_progress(self.settings.stale_in_progress_after) {
                    return Err(GatewayError::InProgressConflict(key.to_owned()).into());
                }

                warn!(scope, key, "recovering stale in-progress idempotency record");
                self.store.touch_record(tx, record.id).await?;

                // The crashed attempt may have committed the payment. If so,
                // complete the record from it and replay.
                if let Some(payment) = self.store.find_payment_by_key(tx, key).await? {
                    let body = response_body(&payment)?;
                    self.store
                        .complete_record(tx, record.id, CREATED, &body, payment.id)
                        .await?;
                    return Ok(ChargeOutcome {
                        http_status: CREATED,
                        body,
                        replayed: true,
                    });
                }

                record.id
            }
            None => {
                let record = IdempotencyRecord::in_progress(scope, key, request_hash);
                // Unique violation here means a concurrent insert slipped past
                // the advisory lock; propagate as a race and re-enter.
                self.store.insert_in_progress(tx, &record).await?;
                record.id
            }
        };

        let payment = self.create_payment_and_outbox(tx, key, request).await?;
        let body = response_body(&payment)?;
        self.store
            .complete_record(tx, record_id, CREATED, &body, payment.id)
            .await?;

        Ok(ChargeOutcome {
            http_status: CREATED,
            body,
            replayed: false,
        })
    }

    /// The business effect: authorize with the processor, persist the payment
    /// and its `PaymentCharged` outbox event in the enclosing transaction.
    async fn create_payment_and_outbox(
        &self,
        tx: &S::Tx,
        key: &str,
        request: &ChargeRequest,
    ) -> Result<Payment, TxError> {
        // Safety net next to the unique index on payments.idempotency_key.
        if let Some(existing) = self.store.find_payment_by_key(tx, key).await? {
            return Ok(existing);
        }

        let payment = self
            .processor
            .authorize(key, request)
            .await
            .map_err(GatewayError::Internal)?;
        self.store.insert_payment(tx, &payment).await?;

        let event = PaymentChargedEvent::from_payment(&payment);
        let payload = serde_json::to_string(&event)
            .map_err(|e| GatewayError::Internal(e.into()))?;
        // event_key = payment id, so downstream partitioning groups
        // per-payment events.
        let outbox = OutboxEvent::new(
            "Payment",
            &payment.id.to_string(),
            "PaymentCharged",
            &payment.id.to_string(),
            payload,
        );
        self.store.insert_event(tx, &outbox).await?;

        Ok(payment)
    }
}

fn response_body(payment: &Payment) -> Result<String, GatewayError> {
    serde_json::to_string(&PaymentResponse::from_payment(payment))
        .map_err(|e| GatewayError::Internal(e.into()))
}

/// Extracts the payment id from a stored response body, for the Location
/// header on 201 responses.
pub fn payment_id_from_body(body: &str) -> Option<Uuid> {
    let response: PaymentResponse = serde_json::from_str(body).ok()?;
    Some(response.payment_id)
}
