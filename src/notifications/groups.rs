use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::db::models::{NotificationGroup, NotificationPreferences, PushPayload, QueueItem};
use crate::db::store::NotificationStore;
use crate::notifications::dispatch::{Dispatch, Dispatcher};
use crate::notifications::triggers::render;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupRunSummary {
    pub flushed: u32,
    pub summaries_sent: u32,
    pub summaries_queued: u32,
    pub errors: u32,
}

/// "Ada", "Ada and Grace", "Ada, Grace and 3 others".
pub fn format_actor_names(names: &[String]) -> String {
    let mut unique: Vec<&str> = Vec::new();
    for name in names {
        if !unique.contains(&name.as_str()) {
            unique.push(name);
        }
    }
    match unique.as_slice() {
        [] => "Someone".to_string(),
        [one] => one.to_string(),
        [a, b] => format!("{} and {}", a, b),
        [a, b, rest @ ..] if rest.len() == 1 => format!("{}, {} and 1 other", a, b),
        [a, b, rest @ ..] => format!("{}, {} and {} others", a, b, rest.len()),
    }
}

/// Flushes grouping windows that have closed into one summary push each.
pub struct GroupProcessor {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<Dispatcher>,
    batch_size: i64,
}

impl GroupProcessor {
    pub fn new(store: Arc<dyn NotificationStore>, dispatcher: Arc<Dispatcher>, batch_size: i64) -> Self {
        Self { store, dispatcher, batch_size }
    }

    pub async fn process_due_groups(&self, now: DateTime<Utc>) -> Result<GroupRunSummary> {
        let groups = self.store.claim_due_groups(now, self.batch_size).await?;
        let mut summary = GroupRunSummary::default();

        for group in groups {
            summary.flushed += 1;
            if group.pending_count == 0 {
                debug!("Group {} closed with nothing pending", group.id);
                continue;
            }

            let payload = build_summary(&group);
            match self.send_summary(&group, payload.clone(), now).await {
                Ok(Dispatch::Delivered { .. }) => summary.summaries_sent += 1,
                Ok(Dispatch::Disabled) => {}
                Ok(Dispatch::Queued { .. }) | Ok(Dispatch::Deferred { .. }) => summary.summaries_queued += 1,
                Err(e) => {
                    // The group is already flushed, so the retry queue has to own the summary.
                    warn!("Summary for group {} failed, queueing it: {}", group.id, e);
                    match self.queue_summary(&group, payload, &e.to_string(), now).await {
                        Ok(()) => summary.summaries_queued += 1,
                        Err(e) => {
                            error!("Failed to queue summary for group {}: {}", group.id, e);
                            summary.errors += 1;
                        }
                    }
                }
            }
        }

        if summary.flushed > 0 {
            info!(
                "Flushed {} notification groups ({} sent, {} queued, {} errors)",
                summary.flushed, summary.summaries_sent, summary.summaries_queued, summary.errors
            );
        }
        Ok(summary)
    }

    async fn send_summary(
        &self,
        group: &NotificationGroup,
        payload: PushPayload,
        now: DateTime<Utc>,
    ) -> Result<Dispatch> {
        let config = group.event_type.config();
        let prefs = self
            .store
            .get_preferences(group.user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferences::defaults_for(group.user_id));

        self.dispatcher
            .dispatch(&prefs, payload, config.priority, config.respects_quiet_hours, now)
            .await
    }

    /// Due immediately with no attempt consumed; the queue drainer applies
    /// quiet hours and the retry schedule from there.
    async fn queue_summary(
        &self,
        group: &NotificationGroup,
        payload: PushPayload,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let config = group.event_type.config();
        let mut item = QueueItem::new(group.user_id, payload, config.priority, config.respects_quiet_hours, now, now);
        item.last_error = Some(error.to_string());
        self.store.enqueue(&item).await?;
        Ok(())
    }
}

pub fn build_summary(group: &NotificationGroup) -> PushPayload {
    let config = group.event_type.config();
    let mut vars = group.data.clone();
    vars.insert("count".to_string(), group.event_count.to_string());
    vars.insert("actor_names".to_string(), format_actor_names(&group.actor_names));

    let (title, body) = match &config.grouping {
        Some(policy) => (render(policy.group_title, &vars), render(policy.group_body, &vars)),
        None => (render(config.title, &vars), render(config.body, &vars)),
    };

    PushPayload {
        title,
        body,
        url: config.url.map(|u| render(u, &vars)),
        tag: Some(group.group_key.clone()),
        notification_id: None,
        event_type: group.event_type,
        count: Some(group.event_count),
    }
}
