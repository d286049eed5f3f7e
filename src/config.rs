use std::time::Duration;

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// PostgreSQL connection URL. Env var: `DATABASE_URL`.
    pub database_url: String,
    /// Redis connection URL. Env var: `REDIS_URL`.
    pub redis_url: String,
    /// Kafka bootstrap servers (comma-separated). Env var: `KAFKA_BROKERS`.
    pub kafka_brokers: String,
    /// TCP port to listen on (default 3100). Env var: `GATEWAY_PORT`.
    pub gateway_port: u16,
    pub idempotency: IdempotencySettings,
    pub outbox: OutboxSettings,
}

/// Knobs for the idempotency coordinator.
#[derive(Debug, Clone)]
pub struct IdempotencySettings {
    /// Keyspace for charge idempotency, so the same client key cannot
    /// collide across endpoints.
    pub charge_scope: String,
    /// Age after which an InProgress record is considered stale and may be
    /// recovered by a later caller holding the advisory lock.
    pub stale_in_progress_after: Duration,
    /// TTL for cached responses. No correctness role.
    pub cache_ttl: Duration,
}

/// Knobs for the outbox dispatcher.
#[derive(Debug, Clone)]
pub struct OutboxSettings {
    /// Kafka topic for payment events.
    pub topic: String,
    /// Max number of events claimed per batch.
    pub batch_size: u64,
    /// Delay between dispatcher runs.
    pub publish_interval: Duration,
    /// How long to wait for a broker acknowledgement per event.
    pub send_timeout: Duration,
    /// Send attempts before an event is moved to Dead.
    pub max_attempts: i32,
    /// Base for exponential retry backoff.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            redis_url: std::env::var("REDIS_URL").expect("REDIS_URL"),
            kafka_brokers: std::env::var("KAFKA_BROKERS").expect("KAFKA_BROKERS"),
            gateway_port: env_or("GATEWAY_PORT", 3100),
            idempotency: IdempotencySettings {
                charge_scope: env_or("IDEMPOTENCY_CHARGE_SCOPE", "payments:charge".to_owned()),
                stale_in_progress_after: Duration::from_secs(env_or(
                    "IDEMPOTENCY_STALE_AFTER_SECS",
                    30,
                )),
                cache_ttl: Duration::from_secs(env_or("IDEMPOTENCY_CACHE_TTL_SECS", 1800)),
            },
            outbox: OutboxSettings {
                topic: env_or("OUTBOX_TOPIC", "payments-events".to_owned()),
                batch_size: env_or("OUTBOX_BATCH_SIZE", 100),
                publish_interval: Duration::from_millis(env_or("OUTBOX_PUBLISH_INTERVAL_MS", 1000)),
                send_timeout: Duration::from_secs(env_or("OUTBOX_SEND_TIMEOUT_SECS", 5)),
                max_attempts: env_or("OUTBOX_MAX_ATTEMPTS", 10),
                base_backoff: Duration::from_secs(env_or("OUTBOX_BASE_BACKOFF_SECS", 1)),
                max_backoff: Duration::from_secs(env_or("OUTBOX_MAX_BACKOFF_SECS", 120)),
            },
        }
    }
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            charge_scope: "payments:charge".to_owned(),
            stale_in_progress_after: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(1800),
        }
    }
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            topic: "payments-events".to_owned(),
            batch_size: 100,
            publish_interval: Duration::from_millis(1000),
            send_timeout: Duration::from_secs(5),
            max_attempts: 10,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(120),
        }
    }
}
