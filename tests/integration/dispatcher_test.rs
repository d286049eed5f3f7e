use chrono::Utc;

use payments_gateway::config::OutboxSettings;
use payments_gateway::dispatcher::OutboxDispatcher;
use payments_gateway::domain::repository::OutboxStore;
use payments_gateway::domain::types::{OutboxEvent, OutboxStatus};

use crate::helpers::{MemoryOutboxStore, MockBus, fast_outbox_settings};

fn dispatcher(
    store: MemoryOutboxStore,
    bus: MockBus,
    settings: OutboxSettings,
) -> OutboxDispatcher<MemoryOutboxStore, MockBus> {
    OutboxDispatcher {
        store,
        bus,
        settings,
    }
}

fn sample_event(key: &str, payload: &str) -> OutboxEvent {
    OutboxEvent::new("Payment", key, "PaymentCharged", key, payload.to_owned())
}

#[tokio::test]
async fn should_mark_event_sent_after_broker_ack() {
    let store = MemoryOutboxStore::new();
    let bus = MockBus::acking();
    let event = sample_event("p1", r#"{"ok":true}"#);
    let event_id = event.id;
    store.seed(event);

    let d = dispatcher(store.clone(), bus.clone(), OutboxSettings::default());
    let summary = d.publish_batch().await.unwrap();

    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.sent, 1);

    let updated = store.event(event_id);
    assert_eq!(updated.status, OutboxStatus::Sent);
    assert!(updated.sent_at.is_some());
    assert!(updated.next_attempt_at.is_none());
    assert!(updated.last_error.is_none());

    let calls = bus.calls();
    assert_eq!(calls.len(), 1, "bus called exactly once");
    assert_eq!(
        calls[0],
        (
            "payments-events".to_owned(),
            "p1".to_owned(),
            r#"{"ok":true}"#.to_owned()
        )
    );
}

#[tokio::test]
async fn should_not_reclaim_sent_events() {
    let store = MemoryOutboxStore::new();
    let bus = MockBus::acking();
    store.seed(sample_event("p1", "{}"));

    let d = dispatcher(store.clone(), bus.clone(), OutboxSettings::default());
    d.publish_batch().await.unwrap();

    let summary = d.publish_batch().await.unwrap();
    assert_eq!(summary.claimed, 0, "sent events are terminal");
    assert_eq!(bus.calls().len(), 1);
}

#[tokio::test]
async fn should_retry_then_dead_letter_after_max_attempts() {
    let store = MemoryOutboxStore::new();
    let bus = MockBus::failing(u64::MAX);
    let event = sample_event("p1", "{}");
    let event_id = event.id;
    store.seed(event);

    // Zero backoff keeps the event due on every tick.
    let d = dispatcher(store.clone(), bus.clone(), fast_outbox_settings());

    for tick in 1..=9 {
        let summary = d.publish_batch().await.unwrap();
        assert_eq!(summary.retried, 1, "tick {tick} should schedule a retry");
        let updated = store.event(event_id);
        assert_eq!(updated.status, OutboxStatus::Retry);
        assert_eq!(updated.attempt_count, tick);
    }

    let summary = d.publish_batch().await.unwrap();
    assert_eq!(summary.dead, 1, "tenth failure moves the event to DEAD");

    let updated = store.event(event_id);
    assert_eq!(updated.status, OutboxStatus::Dead);
    assert_eq!(updated.attempt_count, 10);
    assert!(updated.next_attempt_at.is_none());
    assert!(updated.last_error.is_some());

    // Dead events stop being claimed.
    let summary = d.publish_batch().await.unwrap();
    assert_eq!(summary.claimed, 0);
    assert_eq!(bus.calls().len(), 10);
}

#[tokio::test]
async fn should_wait_for_backoff_before_retrying() {
    let store = MemoryOutboxStore::new();
    let bus = MockBus::failing(1);
    store.seed(sample_event("p1", "{}"));

    // Default settings: first retry backs off at least base_backoff (1s).
    let d = dispatcher(store.clone(), bus.clone(), OutboxSettings::default());
    let summary = d.publish_batch().await.unwrap();
    assert_eq!(summary.retried, 1);

    let summary = d.publish_batch().await.unwrap();
    assert_eq!(summary.claimed, 0, "retry is not due before the backoff");
    assert_eq!(bus.calls().len(), 1);
}

#[tokio::test]
async fn should_respect_batch_size_and_created_at_order() {
    let store = MemoryOutboxStore::new();
    let mut ids = Vec::new();
    for i in 0..5 {
        let mut event = sample_event(&format!("p{i}"), "{}");
        event.created_at = Utc::now() + chrono::Duration::milliseconds(i);
        ids.push(event.id);
        store.seed(event);
    }

    let settings = OutboxSettings {
        batch_size: 2,
        ..OutboxSettings::default()
    };
    let tx = store.begin().await.unwrap();
    let batch = store
        .claim_batch(
            &tx,
            &[OutboxStatus::New, OutboxStatus::Retry],
            Utc::now(),
            settings.batch_size,
        )
        .await
        .unwrap();
    store.commit(tx).await.unwrap();

    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].id, ids[0], "oldest event claimed first");
    assert_eq!(batch[1].id, ids[1]);
}

#[tokio::test]
async fn should_hand_disjoint_batches_to_concurrent_claimers() {
    let store = MemoryOutboxStore::new();
    for i in 0..4 {
        store.seed(sample_event(&format!("p{i}"), "{}"));
    }

    // Two overlapping transactions: locked rows are skipped, never shared.
    let tx1 = store.begin().await.unwrap();
    let first = store
        .claim_batch(&tx1, &[OutboxStatus::New], Utc::now(), 2)
        .await
        .unwrap();

    let tx2 = store.begin().await.unwrap();
    let second = store
        .claim_batch(&tx2, &[OutboxStatus::New], Utc::now(), 10)
        .await
        .unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2, "second claimer sees only unclaimed rows");
    for e in &first {
        assert!(
            second.iter().all(|o| o.id != e.id),
            "batches must be disjoint"
        );
    }

    store.commit(tx1).await.unwrap();
    store.commit(tx2).await.unwrap();
}

#[tokio::test]
async fn should_deliver_backlog_exactly_once_across_two_dispatchers() {
    let store = MemoryOutboxStore::new();
    let bus = MockBus::acking();
    for i in 0..6 {
        store.seed(sample_event(&format!("p{i}"), "{}"));
    }

    let settings = OutboxSettings {
        batch_size: 2,
        ..OutboxSettings::default()
    };
    let first = dispatcher(store.clone(), bus.clone(), settings.clone());
    let second = dispatcher(store.clone(), bus.clone(), settings);

    // Alternate instances over the same backlog until it drains.
    for _ in 0..3 {
        first.publish_batch().await.unwrap();
        second.publish_batch().await.unwrap();
    }

    let events = store.events();
    assert!(events.iter().all(|e| e.status == OutboxStatus::Sent));
    assert_eq!(bus.calls().len(), 6, "each event published exactly once");
}

#[tokio::test]
async fn should_do_nothing_on_empty_backlog() {
    let store = MemoryOutboxStore::new();
    let bus = MockBus::acking();
    let d = dispatcher(store, bus.clone(), OutboxSettings::default());

    let summary = d.publish_batch().await.unwrap();
    assert_eq!(summary.claimed, 0);
    assert!(bus.calls().is_empty());
}

#[tokio::test]
async fn should_keep_processing_batch_after_one_event_fails() {
    let store = MemoryOutboxStore::new();
    let bus = MockBus::failing(1);
    let failing = sample_event("p0", "{}");
    let mut ok = sample_event("p1", "{}");
    ok.created_at = failing.created_at + chrono::Duration::milliseconds(1);
    let ok_id = ok.id;
    store.seed(failing);
    store.seed(ok);

    let d = dispatcher(store.clone(), bus, OutboxSettings::default());
    let summary = d.publish_batch().await.unwrap();

    assert_eq!(summary.retried, 1);
    assert_eq!(summary.sent, 1, "a bad event never stops the batch");
    assert_eq!(store.event(ok_id).status, OutboxStatus::Sent);
}
