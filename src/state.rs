use deadpool_redis::Pool as RedisPool;
use sea_orm::DatabaseConnection;

use crate::config::IdempotencySettings;
use crate::infra::cache::RedisResponseCache;
use crate::infra::db::{DbChargeStore, DbOutboxStore, DbPaymentRepository};

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub redis: RedisPool,
    pub idempotency: IdempotencySettings,
}

impl AppState {
    pub fn charge_store(&self) -> DbChargeStore {
        DbChargeStore {
            db: self.db.clone(),
        }
    }

    pub fn outbox_store(&self) -> DbOutboxStore {
        DbOutboxStore {
            db: self.db.clone(),
        }
    }

    pub fn payment_repo(&self) -> DbPaymentRepository {
        DbPaymentRepository {
            db: self.db.clone(),
        }
    }

    pub fn response_cache(&self) -> RedisResponseCache {
        RedisResponseCache {
            pool: self.redis.clone(),
            ttl: self.idempotency.cache_ttl,
        }
    }
}
