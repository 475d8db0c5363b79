use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{
    GroupUpsert, Notification, NotificationGroup, NotificationPreferences, PurgeSummary,
    PushSubscription, QueueItem, QueueStats, QueueStatus,
};
use crate::db::store::NotificationStore;
use crate::Result;

#[derive(Debug, Default)]
struct State {
    preferences: HashMap<Uuid, NotificationPreferences>,
    notifications: Vec<Notification>,
    groups: Vec<NotificationGroup>,
    queue: Vec<QueueItem>,
    subscriptions: Vec<PushSubscription>,
}

/// Process-local store. Every operation runs under a single write lock, which
/// gives the same atomicity the Postgres store gets from single statements.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn groups(&self) -> Vec<NotificationGroup> {
        self.state.read().await.groups.clone()
    }

    pub async fn queue_items(&self) -> Vec<QueueItem> {
        self.state.read().await.queue.clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>> {
        Ok(self.state.read().await.preferences.get(&user_id).cloned())
    }

    async fn upsert_preferences(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences> {
        let mut state = self.state.write().await;
        state.preferences.insert(prefs.user_id, prefs.clone());
        Ok(prefs.clone())
    }

    async fn has_recent_duplicate(&self, user_id: Uuid, dedup_key: &str, since: DateTime<Utc>) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .any(|n| n.user_id == user_id && n.dedup_key == dedup_key && n.created_at >= since))
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<Notification> {
        let mut state = self.state.write().await;
        state.notifications.push(notification.clone());
        Ok(notification.clone())
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let state = self.state.read().await;
        let mut items: Vec<_> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read()))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_unread(&self, user_id: Uuid) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read())
            .count() as i64)
    }

    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.user_id == user_id)
        {
            Some(n) => {
                if n.read_at.is_none() {
                    n.read_at = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for n in state
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && n.read_at.is_none())
        {
            n.read_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn upsert_group(&self, candidate: &NotificationGroup, actor_name: Option<&str>) -> Result<GroupUpsert> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.groups.iter_mut().find(|g| {
            g.user_id == candidate.user_id && g.group_key == candidate.group_key && g.flushed_at.is_none()
        }) {
            existing.event_count += 1;
            existing.pending_count += 1;
            if let Some(name) = actor_name {
                existing.actor_names.push(name.to_string());
            }
            existing.data = candidate.data.clone();
            return Ok(GroupUpsert { group: existing.clone(), created: false });
        }

        state.groups.push(candidate.clone());
        Ok(GroupUpsert { group: candidate.clone(), created: true })
    }

    async fn claim_due_groups(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<NotificationGroup>> {
        let mut state = self.state.write().await;
        let mut claimed = Vec::new();
        for g in state
            .groups
            .iter_mut()
            .filter(|g| g.flushed_at.is_none() && g.window_end <= now)
            .take(limit.max(0) as usize)
        {
            g.flushed_at = Some(now);
            claimed.push(g.clone());
        }
        Ok(claimed)
    }

    async fn enqueue(&self, item: &QueueItem) -> Result<QueueItem> {
        let mut state = self.state.write().await;
        state.queue.push(item.clone());
        Ok(item.clone())
    }

    async fn claim_due_queue_items(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        let mut state = self.state.write().await;
        let mut due: Vec<&mut QueueItem> = state
            .queue
            .iter_mut()
            .filter(|i| i.status == QueueStatus::Pending && i.scheduled_for <= now)
            .collect();
        due.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for));

        let mut claimed = Vec::new();
        for item in due.into_iter().take(limit.max(0) as usize) {
            item.status = QueueStatus::Processing;
            item.updated_at = now;
            claimed.push(item.clone());
        }
        Ok(claimed)
    }

    async fn release_stale_queue_items(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut released = 0;
        for item in state
            .queue
            .iter_mut()
            .filter(|i| i.status == QueueStatus::Processing && i.updated_at < older_than)
        {
            item.status = QueueStatus::Pending;
            released += 1;
        }
        Ok(released)
    }

    async fn mark_queue_item_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(item) = state.queue.iter_mut().find(|i| i.id == id) {
            item.status = QueueStatus::Sent;
            item.sent_at = Some(at);
            item.updated_at = at;
        }
        Ok(())
    }

    async fn reschedule_queue_item(
        &self,
        id: Uuid,
        attempts: i32,
        scheduled_for: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(item) = state.queue.iter_mut().find(|i| i.id == id) {
            item.status = QueueStatus::Pending;
            item.attempts = attempts;
            item.scheduled_for = scheduled_for;
            if let Some(err) = last_error {
                item.last_error = Some(err.to_string());
            }
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_queue_item_failed(&self, id: Uuid, attempts: i32, error: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(item) = state.queue.iter_mut().find(|i| i.id == id) {
            item.status = QueueStatus::Failed;
            item.attempts = attempts;
            item.last_error = Some(error.to_string());
            item.updated_at = at;
        }
        Ok(())
    }

    async fn get_queue_item(&self, id: Uuid) -> Result<Option<QueueItem>> {
        Ok(self.state.read().await.queue.iter().find(|i| i.id == id).cloned())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let state = self.state.read().await;
        let mut stats = QueueStats::default();
        for item in &state.queue {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Sent => stats.sent += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<PushSubscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn upsert_subscription(&self, subscription: &PushSubscription) -> Result<PushSubscription> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .subscriptions
            .iter_mut()
            .find(|s| s.endpoint == subscription.endpoint)
        {
            existing.user_id = subscription.user_id;
            existing.p256dh = subscription.p256dh.clone();
            existing.auth = subscription.auth.clone();
            existing.user_agent = subscription.user_agent.clone();
            return Ok(existing.clone());
        }
        state.subscriptions.push(subscription.clone());
        Ok(subscription.clone())
    }

    async fn delete_subscription(&self, user_id: Uuid, endpoint: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.subscriptions.len();
        state
            .subscriptions
            .retain(|s| !(s.user_id == user_id && s.endpoint == endpoint));
        Ok(state.subscriptions.len() != before)
    }

    async fn delete_subscription_by_id(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        state.subscriptions.retain(|s| s.id != id);
        Ok(())
    }

    async fn touch_subscription(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(s) = state.subscriptions.iter_mut().find(|s| s.id == id) {
            s.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn purge(
        &self,
        read_notifications_before: DateTime<Utc>,
        queue_before: DateTime<Utc>,
    ) -> Result<PurgeSummary> {
        let mut state = self.state.write().await;

        let before = state.notifications.len();
        state
            .notifications
            .retain(|n| !(n.is_read() && n.created_at < read_notifications_before));
        let notifications = (before - state.notifications.len()) as u64;

        let before = state.queue.len();
        state.queue.retain(|i| {
            !(matches!(i.status, QueueStatus::Sent | QueueStatus::Failed) && i.updated_at < queue_before)
        });
        let queue_items = (before - state.queue.len()) as u64;

        let before = state.groups.len();
        state
            .groups
            .retain(|g| !matches!(g.flushed_at, Some(at) if at < queue_before));
        let groups = (before - state.groups.len()) as u64;

        Ok(PurgeSummary { notifications, queue_items, groups })
    }
}
