use std::time::Duration;

use chrono::Utc;
use rand::Rng as _;
use tracing::{error, info, warn};

use crate::config::OutboxSettings;
use crate::domain::repository::{EventBus, OutboxStore};
use crate::domain::types::OutboxStatus;
use crate::error::GatewayError;

/// Cap for stored error messages.
const MAX_ERROR_LEN: usize = 2000;

/// Per-run counters, also returned for tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead: usize,
}

/// Background publisher draining the outbox to Kafka.
///
/// Each run claims a batch with skip-locked row locks and keeps them for the
/// whole transaction, so multiple dispatcher instances process disjoint
/// batches. Events are published sequentially with an acknowledgement
/// timeout; failures back off exponentially until `max_attempts`, then the
/// row goes to Dead and is never claimed again.
pub struct OutboxDispatcher<S, B>
where
    S: OutboxStore,
    B: EventBus,
{
    pub store: S,
    pub bus: B,
    pub settings: OutboxSettings,
}

impl<S, B> OutboxDispatcher<S, B>
where
    S: OutboxStore,
    B: EventBus,
{
    /// Runs forever with the configured publish interval. A failed run is
    /// logged and the next tick starts fresh; a single bad event never stops
    /// the loop.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.settings.publish_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.publish_batch().await {
                error!(error = %e, "outbox publish batch failed");
            }
        }
    }

    pub async fn publish_batch(&self) -> Result<BatchSummary, GatewayError> {
        let tx = self.store.begin().await.map_err(anyhow::Error::from)?;

        let now = Utc::now();
        let batch = self
            .store
            .claim_batch(
                &tx,
                &[OutboxStatus::New, OutboxStatus::Retry],
                now,
                self.settings.batch_size,
            )
            .await
            .map_err(anyhow::Error::from)?;

        let mut summary = BatchSummary {
            claimed: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            self.store.commit(tx).await.map_err(anyhow::Error::from)?;
            return Ok(summary);
        }

        for mut event in batch {
            let publish = self
                .bus
                .publish(&self.settings.topic, &event.event_key, &event.payload);
            let outcome = match tokio::time::timeout(self.settings.send_timeout, publish).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.0),
                Err(_) => Err(format!(
                    "broker acknowledgement timed out after {:?}",
                    self.settings.send_timeout
                )),
            };

            let now = Utc::now();
            match outcome {
                Ok(()) => {
                    event.mark_sent(now);
                    summary.sent += 1;
                }
                Err(cause) => {
                    let cause = truncate_error(&cause);
                    if event.attempt_count + 1 >= self.settings.max_attempts {
                        event.mark_dead(cause.clone(), now);
                        summary.dead += 1;
                        error!(
                            event_id = %event.id,
                            attempts = event.attempt_count,
                            error = %cause,
                            "outbox event moved to DEAD"
                        );
                    } else {
                        let backoff = compute_backoff(
                            self.settings.base_backoff,
                            self.settings.max_backoff,
                            event.attempt_count + 1,
                        );
                        event.mark_retry(cause.clone(), backoff, now);
                        summary.retried += 1;
                        warn!(
                            event_id = %event.id,
                            attempt = event.attempt_count,
                            next_attempt_at = ?event.next_attempt_at,
                            error = %cause,
                            "outbox event publish failed, scheduled retry"
                        );
                    }
                }
            }

            self.store
                .update_event(&tx, &event)
                .await
                .map_err(anyhow::Error::from)?;
        }

        self.store.commit(tx).await.map_err(anyhow::Error::from)?;

        info!(
            sent = summary.sent,
            retry = summary.retried,
            dead = summary.dead,
            topic = %self.settings.topic,
            "outbox publish batch done"
        );
        Ok(summary)
    }
}

/// Exponential backoff with jitter for attempt `n` (1-based):
/// `clamp(base * 2^(n-1) * jitter, base, max)`, jitter uniform in [0.5, 1.5].
pub fn compute_backoff(base: Duration, max: Duration, attempt: i32) -> Duration {
    let base_ms = base.as_millis() as f64;
    let max_ms = max.as_millis() as f64;

    let exp = 2f64.powi((attempt - 1).max(0).min(32));
    let jitter = rand::rng().random_range(0.5..=1.5);
    let backoff = (base_ms * exp * jitter).clamp(base_ms, max_ms);

    Duration::from_millis(backoff as u64)
}

fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_owned();
    }
    let mut end = MAX_ERROR_LEN;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_owned()
}
