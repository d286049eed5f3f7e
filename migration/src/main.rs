use sea_orm_migration::prelude::*;

mod m20260401_000001_create_payments;
mod m20260401_000002_create_idempotency_records;
mod m20260401_000003_create_outbox_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260401_000001_create_payments::Migration),
            Box::new(m20260401_000002_create_idempotency_records::Migration),
            Box::new(m20260401_000003_create_outbox_events::Migration),
        ]
    }
}

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
