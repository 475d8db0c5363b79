use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::db::models::{NotificationPreferences, PushPayload, QueueItem};
use crate::db::store::NotificationStore;
use crate::notifications::push::{DeliveryReport, PushDeliveryService};
use crate::notifications::triggers::Priority;
use crate::Result;

/// What happened to a push once the in-app side was settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "push", rename_all = "snake_case")]
pub enum Dispatch {
    Disabled,
    Deferred { queue_item_id: Uuid, until: DateTime<Utc> },
    Delivered { report: DeliveryReport },
    Queued { queue_item_id: Uuid, retry_at: DateTime<Utc> },
}

/// Push path shared by fresh events and group summaries: preference gate,
/// quiet-hours deferral, immediate send, fall back to the retry queue.
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    delivery: Arc<PushDeliveryService>,
    queue: QueueConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn NotificationStore>, delivery: Arc<PushDeliveryService>, queue: QueueConfig) -> Self {
        Self { store, delivery, queue }
    }

    pub async fn dispatch(
        &self,
        prefs: &NotificationPreferences,
        payload: PushPayload,
        priority: Priority,
        respects_quiet_hours: bool,
        now: DateTime<Utc>,
    ) -> Result<Dispatch> {
        let user_id = prefs.user_id;

        if !prefs.push_enabled {
            return Ok(Dispatch::Disabled);
        }

        if respects_quiet_hours {
            if let Some(until) = prefs.quiet_until(now) {
                let item = QueueItem::new(user_id, payload, priority, true, until, now);
                let item = self.store.enqueue(&item).await?;
                info!("Quiet hours for user {}, deferred push {} until {}", user_id, item.id, until);
                return Ok(Dispatch::Deferred { queue_item_id: item.id, until });
            }
        }

        let (report, error) = self.delivery.deliver(user_id, &payload, priority, now).await?;
        if !report.should_retry() {
            return Ok(Dispatch::Delivered { report });
        }

        let retry_at = now + self.queue.retry_delay(1);
        let mut item = QueueItem::new(user_id, payload, priority, respects_quiet_hours, retry_at, now);
        item.attempts = 1;
        item.last_error = error;
        let item = self.store.enqueue(&item).await?;
        warn!("Push to user {} failed, queued {} for retry at {}", user_id, item.id, retry_at);

        Ok(Dispatch::Queued { queue_item_id: item.id, retry_at })
    }
}
