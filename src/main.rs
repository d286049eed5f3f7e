use sea_orm::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use payments_gateway::config::GatewayConfig;
use payments_gateway::dispatcher::OutboxDispatcher;
use payments_gateway::infra::bus::KafkaEventBus;
use payments_gateway::infra::db::DbOutboxStore;
use payments_gateway::router::build_router;
use payments_gateway::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = GatewayConfig::from_env();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let redis_cfg = deadpool_redis::Config::from_url(&config.redis_url);
    let redis = redis_cfg
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("failed to create Redis pool");

    let bus = KafkaEventBus::new(&config.kafka_brokers).expect("failed to create Kafka producer");

    // Dispatcher runs alongside the HTTP server. More instances of the
    // service mean more dispatchers; skip-locked claims keep them disjoint.
    let dispatcher = OutboxDispatcher {
        store: DbOutboxStore { db: db.clone() },
        bus,
        settings: config.outbox.clone(),
    };
    tokio::spawn(dispatcher.run());

    let state = AppState {
        db,
        redis,
        idempotency: config.idempotency.clone(),
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.gateway_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    info!("payments gateway listening on {addr}");
    axum::serve(listener, router).await.expect("server error");
}
