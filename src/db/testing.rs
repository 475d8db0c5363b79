//! Store wrapper with switchable failures, for exercising error paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::db::memory::MemoryStore;
use crate::db::models::{
    GroupUpsert, Notification, NotificationGroup, NotificationPreferences, PurgeSummary,
    PushSubscription, QueueItem, QueueStats,
};
use crate::db::store::NotificationStore;
use crate::error::{AppError, DatabaseError};
use crate::Result;

#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Number of upcoming `list_subscriptions` calls that fail.
    pub failing_subscription_reads: AtomicUsize,
    pub failing_touches: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_subscription_reads(&self, times: usize) {
        self.failing_subscription_reads.store(times, Ordering::SeqCst);
    }

    pub fn fail_touches(&self, fail: bool) {
        self.failing_touches.store(fail, Ordering::SeqCst);
    }

    fn unavailable() -> AppError {
        AppError::DatabaseError(DatabaseError::ConnectionError("connection reset".to_string()))
    }
}

#[async_trait]
impl NotificationStore for FlakyStore {
    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>> {
        self.inner.get_preferences(user_id).await
    }

    async fn upsert_preferences(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences> {
        self.inner.upsert_preferences(prefs).await
    }

    async fn has_recent_duplicate(&self, user_id: Uuid, dedup_key: &str, since: DateTime<Utc>) -> Result<bool> {
        self.inner.has_recent_duplicate(user_id, dedup_key, since).await
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<Notification> {
        self.inner.insert_notification(notification).await
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        self.inner.list_notifications(user_id, limit, offset, unread_only).await
    }

    async fn count_unread(&self, user_id: Uuid) -> Result<i64> {
        self.inner.count_unread(user_id).await
    }

    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.inner.mark_read(user_id, notification_id, at).await
    }

    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        self.inner.mark_all_read(user_id, at).await
    }

    async fn upsert_group(&self, candidate: &NotificationGroup, actor_name: Option<&str>) -> Result<GroupUpsert> {
        self.inner.upsert_group(candidate, actor_name).await
    }

    async fn claim_due_groups(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<NotificationGroup>> {
        self.inner.claim_due_groups(now, limit).await
    }

    async fn enqueue(&self, item: &QueueItem) -> Result<QueueItem> {
        self.inner.enqueue(item).await
    }

    async fn claim_due_queue_items(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        self.inner.claim_due_queue_items(now, limit).await
    }

    async fn release_stale_queue_items(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.inner.release_stale_queue_items(older_than).await
    }

    async fn mark_queue_item_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.inner.mark_queue_item_sent(id, at).await
    }

    async fn reschedule_queue_item(
        &self,
        id: Uuid,
        attempts: i32,
        scheduled_for: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.inner.reschedule_queue_item(id, attempts, scheduled_for, last_error).await
    }

    async fn mark_queue_item_failed(&self, id: Uuid, attempts: i32, error: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.mark_queue_item_failed(id, attempts, error, at).await
    }

    async fn get_queue_item(&self, id: Uuid) -> Result<Option<QueueItem>> {
        self.inner.get_queue_item(id).await
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        self.inner.queue_stats().await
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<PushSubscription>> {
        let fail = self
            .failing_subscription_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Self::unavailable());
        }
        self.inner.list_subscriptions(user_id).await
    }

    async fn upsert_subscription(&self, subscription: &PushSubscription) -> Result<PushSubscription> {
        self.inner.upsert_subscription(subscription).await
    }

    async fn delete_subscription(&self, user_id: Uuid, endpoint: &str) -> Result<bool> {
        self.inner.delete_subscription(user_id, endpoint).await
    }

    async fn delete_subscription_by_id(&self, id: Uuid) -> Result<()> {
        self.inner.delete_subscription_by_id(id).await
    }

    async fn touch_subscription(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if self.failing_touches.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.touch_subscription(id, at).await
    }

    async fn purge(
        &self,
        read_notifications_before: DateTime<Utc>,
        queue_before: DateTime<Utc>,
    ) -> Result<PurgeSummary> {
        self.inner.purge(read_notifications_before, queue_before).await
    }
}
