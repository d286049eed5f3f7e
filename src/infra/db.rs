use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Condition, LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    SqlErr, Statement, TransactionTrait,
};
use uuid::Uuid;

use payments_gateway_schema::{idempotency_records, outbox_events, payments};

use crate::domain::repository::{ChargeStore, OutboxStore, PaymentRepository};
use crate::domain::types::{
    IdempotencyRecord, IdempotencyStatus, OutboxEvent, OutboxStatus, Payment, PaymentStatus,
};
use crate::error::StoreError;
use crate::hash;

fn map_insert_err(e: DbErr, what: &'static str) -> StoreError {
    if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        StoreError::UniqueViolation
    } else {
        StoreError::Backend(anyhow::Error::new(e).context(what))
    }
}

// ── Charge store ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbChargeStore {
    pub db: DatabaseConnection,
}

impl ChargeStore for DbChargeStore {
    type Tx = DatabaseTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(self.db.begin().await.context("begin charge transaction")?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        Ok(tx.commit().await.context("commit charge transaction")?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        Ok(tx.rollback().await.context("rollback charge transaction")?)
    }

    async fn lock_scope_key(
        &self,
        tx: &Self::Tx,
        scope: &str,
        key: &str,
    ) -> Result<(), StoreError> {
        // pg_advisory_xact_lock serializes racing first-time requests before
        // an idempotency row exists; released when the transaction ends.
        let lock_id = hash::advisory_lock_id(scope, key);
        tx.query_one(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock($1)",
            [lock_id.into()],
        ))
        .await
        .context("acquire advisory lock")?;
        Ok(())
    }

    async fn find_record_for_update(
        &self,
        tx: &Self::Tx,
        scope: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let model = idempotency_records::Entity::find()
            .filter(idempotency_records::Column::Scope.eq(scope))
            .filter(idempotency_records::Column::IdempotencyKey.eq(key))
            .lock(LockType::Update)
            .one(tx)
            .await
            .context("find idempotency record for update")?;
        model.map(record_from_model).transpose()
    }

    async fn insert_in_progress(
        &self,
        tx: &Self::Tx,
        record: &IdempotencyRecord,
    ) -> Result<(), StoreError> {
        idempotency_records::ActiveModel {
            id: Set(record.id),
            scope: Set(record.scope.clone()),
            idempotency_key: Set(record.idempotency_key.clone()),
            request_hash: Set(record.request_hash.clone()),
            status: Set(record.status.as_str().to_owned()),
            http_status: Set(None),
            response_body: Set(None),
            payment_id: Set(None),
            created_at: Set(record.created_at),
            updated_at: Set(record.updated_at),
        }
        .insert(tx)
        .await
        .map_err(|e| map_insert_err(e, "insert in-progress idempotency record"))?;
        Ok(())
    }

    async fn touch_record(&self, tx: &Self::Tx, id: Uuid) -> Result<(), StoreError> {
        idempotency_records::ActiveModel {
            id: Set(id),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(tx)
        .await
        .context("touch idempotency record")?;
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
        idempotency_records::ActiveModel {
            id: Set(id),
            status: Set(IdempotencyStatus::Completed.as_str().to_owned()),
            http_status: Set(Some(http_status as i16)),
            response_body: Set(Some(response_body.to_owned())),
            payment_id: Set(Some(payment_id)),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(tx)
        .await
        .context("complete idempotency record")?;
        Ok(())
    }

    async fn find_payment_by_key(
        &self,
        tx: &Self::Tx,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let model = payments::Entity::find()
            .filter(payments::Column::IdempotencyKey.eq(key))
            .one(tx)
            .await
            .context("find payment by idempotency key")?;
        model.map(payment_from_model).transpose()
    }

    async fn insert_payment(&self, tx: &Self::Tx, payment: &Payment) -> Result<(), StoreError> {
        payments::ActiveModel {
            id: Set(payment.id),
            idempotency_key: Set(payment.idempotency_key.clone()),
            customer_id: Set(payment.customer_id.clone()),
            amount: Set(payment.amount),
            currency: Set(payment.currency.clone()),
            payment_method_token: Set(payment.payment_method_token.clone()),
            description: Set(payment.description.clone()),
            status: Set(payment.status.as_str().to_owned()),
            created_at: Set(payment.created_at),
        }
        .insert(tx)
        .await
        .map_err(|e| map_insert_err(e, "insert payment"))?;
        Ok(())
    }

    async fn insert_event(&self, tx: &Self::Tx, event: &OutboxEvent) -> Result<(), StoreError> {
        outbox_events::ActiveModel {
            id: Set(event.id),
            aggregate_type: Set(event.aggregate_type.clone()),
            aggregate_id: Set(event.aggregate_id.clone()),
            event_type: Set(event.event_type.clone()),
            event_key: Set(event.event_key.clone()),
            payload: Set(event.payload.clone()),
            status: Set(event.status.as_str().to_owned()),
            attempt_count: Set(event.attempt_count),
            next_attempt_at: Set(event.next_attempt_at),
            last_error: Set(event.last_error.clone()),
            created_at: Set(event.created_at),
            updated_at: Set(event.updated_at),
            sent_at: Set(event.sent_at),
        }
        .insert(tx)
        .await
        .map_err(|e| map_insert_err(e, "insert outbox event"))?;
        Ok(())
    }
}

// ── Outbox store ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxStore {
    pub db: DatabaseConnection,
}

impl OutboxStore for DbOutboxStore {
    type Tx = DatabaseTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(self.db.begin().await.context("begin outbox transaction")?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        Ok(tx.commit().await.context("commit outbox transaction")?)
    }

    async fn claim_batch(
        &self,
        tx: &Self::Tx,
        statuses: &[OutboxStatus],
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let statuses: Vec<&str> = statuses.iter().map(OutboxStatus::as_str).collect();
        // FOR UPDATE SKIP LOCKED: concurrent dispatchers dequeue disjoint
        // batches without blocking each other.
        let models = outbox_events::Entity::find()
            .filter(outbox_events::Column::Status.is_in(statuses))
            .filter(
                Condition::any()
                    .add(outbox_events::Column::NextAttemptAt.is_null())
                    .add(outbox_events::Column::NextAttemptAt.lte(now)),
            )
            .order_by_asc(outbox_events::Column::CreatedAt)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(tx)
            .await
            .context("claim outbox batch")?;
        models.into_iter().map(event_from_model).collect()
    }

    async fn update_event(&self, tx: &Self::Tx, event: &OutboxEvent) -> Result<(), StoreError> {
        outbox_events::ActiveModel {
            id: Set(event.id),
            status: Set(event.status.as_str().to_owned()),
            attempt_count: Set(event.attempt_count),
            next_attempt_at: Set(event.next_attempt_at),
            last_error: Set(event.last_error.clone()),
            updated_at: Set(event.updated_at),
            sent_at: Set(event.sent_at),
            ..Default::default()
        }
        .update(tx)
        .await
        .context("update outbox event")?;
        Ok(())
    }
}

// ── Payment repository ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbPaymentRepository {
    pub db: DatabaseConnection,
}

impl PaymentRepository for DbPaymentRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let model = payments::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("find payment by id")?;
        model.map(payment_from_model).transpose()
    }
}

// ── Model mapping ─────────────────────────────────────────────────────────────

fn payment_from_model(model: payments::Model) -> Result<Payment, StoreError> {
    let status = PaymentStatus::parse(&model.status).ok_or_else(|| {
        StoreError::Backend(anyhow::anyhow!("unknown payment status '{}'", model.status))
    })?;
    Ok(Payment {
        id: model.id,
        idempotency_key: model.idempotency_key,
        customer_id: model.customer_id,
        amount: model.amount,
        currency: model.currency,
        payment_method_token: model.payment_method_token,
        description: model.description,
        status,
        created_at: model.created_at,
    })
}

fn record_from_model(model: idempotency_records::Model) -> Result<IdempotencyRecord, StoreError> {
    let status = IdempotencyStatus::parse(&model.status).ok_or_else(|| {
        StoreError::Backend(anyhow::anyhow!(
            "unknown idempotency status '{}'",
            model.status
        ))
    })?;
    Ok(IdempotencyRecord {
        id: model.id,
        scope: model.scope,
        idempotency_key: model.idempotency_key,
        request_hash: model.request_hash,
        status,
        http_status: model.http_status.map(|s| s as u16),
        response_body: model.response_body,
        payment_id: model.payment_id,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn event_from_model(model: outbox_events::Model) -> Result<OutboxEvent, StoreError> {
    let status = OutboxStatus::parse(&model.status).ok_or_else(|| {
        StoreError::Backend(anyhow::anyhow!("unknown outbox status '{}'", model.status))
    })?;
    Ok(OutboxEvent {
        id: model.id,
        aggregate_type: model.aggregate_type,
        aggregate_id: model.aggregate_id,
        event_type: model.event_type,
        event_key: model.event_key,
        payload: model.payload,
        status,
        attempt_count: model.attempt_count,
        next_attempt_at: model.next_attempt_at,
        last_error: model.last_error,
        created_at: model.created_at,
        updated_at: model.updated_at,
        sent_at: model.sent_at,
    })
}
