//! Drains the push retry queue: deferred quiet-hours deliveries and failed
//! sends waiting for their next attempt.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::QueueConfig;
use crate::db::models::{NotificationPreferences, QueueItem, QueueStats};
use crate::db::store::NotificationStore;
use crate::notifications::push::PushDeliveryService;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueRunSummary {
    pub processed: u32,
    pub sent: u32,
    pub retried: u32,
    pub deferred: u32,
    pub failed: u32,
    pub released: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    Sent,
    Retried,
    Deferred,
    Failed,
}

pub struct QueueProcessor {
    store: Arc<dyn NotificationStore>,
    delivery: Arc<PushDeliveryService>,
    config: QueueConfig,
}

impl QueueProcessor {
    pub fn new(store: Arc<dyn NotificationStore>, delivery: Arc<PushDeliveryService>, config: QueueConfig) -> Self {
        Self { store, delivery, config }
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.store.queue_stats().await
    }

    pub async fn process_queue(&self, now: DateTime<Utc>) -> Result<QueueRunSummary> {
        let mut summary = QueueRunSummary::default();

        summary.released = self
            .store
            .release_stale_queue_items(now - Duration::seconds(self.config.stale_after_secs))
            .await?;
        if summary.released > 0 {
            warn!("Released {} queue items stuck in processing", summary.released);
        }

        let items = self.store.claim_due_queue_items(now, self.config.batch_size).await?;
        for item in items {
            summary.processed += 1;
            match self.process_item(&item, now).await {
                Ok(ItemResult::Sent) => summary.sent += 1,
                Ok(ItemResult::Retried) => summary.retried += 1,
                Ok(ItemResult::Deferred) => summary.deferred += 1,
                Ok(ItemResult::Failed) => summary.failed += 1,
                Err(e) => {
                    // Left in processing; released on a later run.
                    error!("Error processing queue item {}: {}", item.id, e);
                }
            }
        }

        if summary.processed > 0 {
            info!(
                "Queue run: {} processed, {} sent, {} retried, {} deferred, {} failed",
                summary.processed, summary.sent, summary.retried, summary.deferred, summary.failed
            );
        }
        Ok(summary)
    }

    async fn process_item(&self, item: &QueueItem, now: DateTime<Utc>) -> Result<ItemResult> {
        let prefs = self
            .store
            .get_preferences(item.user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferences::defaults_for(item.user_id));

        if item.respects_quiet_hours {
            if let Some(until) = prefs.quiet_until(now) {
                self.store
                    .reschedule_queue_item(item.id, item.attempts, until, None)
                    .await?;
                info!("Queue item {} still in quiet hours, deferred until {}", item.id, until);
                return Ok(ItemResult::Deferred);
            }
        }

        let (report, error) = self
            .delivery
            .deliver(item.user_id, &item.payload, item.priority, now)
            .await?;

        let attempts = item.attempts + 1;
        if report.is_rejected() {
            let error = error.unwrap_or_else(|| "push rejected".to_string());
            self.store
                .mark_queue_item_failed(item.id, attempts, &error, now)
                .await?;
            warn!("Queue item {} rejected by push service: {}", item.id, error);
            return Ok(ItemResult::Failed);
        }
        if !report.should_retry() {
            self.store.mark_queue_item_sent(item.id, now).await?;
            return Ok(ItemResult::Sent);
        }

        let error = error.unwrap_or_else(|| "delivery failed".to_string());
        if attempts as u32 > self.config.max_retries {
            self.store
                .mark_queue_item_failed(item.id, attempts, &error, now)
                .await?;
            warn!("Queue item {} failed after {} attempts: {}", item.id, attempts, error);
            return Ok(ItemResult::Failed);
        }

        let retry_at = now + self.config.retry_delay(attempts as u32);
        self.store
            .reschedule_queue_item(item.id, attempts, retry_at, Some(&error))
            .await?;
        info!("Queue item {} attempt {} failed, retrying at {}", item.id, attempts, retry_at);
        Ok(ItemResult::Retried)
    }
}
