pub mod idempotency_records;
pub mod outbox_events;
pub mod payments;
