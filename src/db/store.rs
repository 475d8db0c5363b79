use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{
    GroupUpsert, Notification, NotificationGroup, NotificationPreferences, PurgeSummary,
    PushSubscription, QueueItem, QueueStats,
};
use crate::Result;

/// Persistence seam for the notification pipeline.
///
/// Implementations must make `upsert_group`, `claim_due_groups` and
/// `claim_due_queue_items` atomic: concurrent callers never see the same
/// group opened twice or the same queue item claimed twice.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    // preferences
    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>>;
    async fn upsert_preferences(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences>;

    // inbox
    async fn has_recent_duplicate(&self, user_id: Uuid, dedup_key: &str, since: DateTime<Utc>) -> Result<bool>;
    async fn insert_notification(&self, notification: &Notification) -> Result<Notification>;
    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> Result<Vec<Notification>>;
    async fn count_unread(&self, user_id: Uuid) -> Result<i64>;
    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid, at: DateTime<Utc>) -> Result<bool>;
    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64>;

    // grouping
    /// Opens `candidate` if no unflushed group exists for its
    /// `(user_id, group_key)`; otherwise bumps the existing group's counters,
    /// appends `actor_name` and replaces its data.
    async fn upsert_group(&self, candidate: &NotificationGroup, actor_name: Option<&str>) -> Result<GroupUpsert>;
    /// Marks up to `limit` groups whose window has ended as flushed and
    /// returns them.
    async fn claim_due_groups(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<NotificationGroup>>;

    // queue
    async fn enqueue(&self, item: &QueueItem) -> Result<QueueItem>;
    /// Moves up to `limit` due pending items to `processing` and returns them.
    async fn claim_due_queue_items(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>>;
    async fn release_stale_queue_items(&self, older_than: DateTime<Utc>) -> Result<u64>;
    async fn mark_queue_item_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
    async fn reschedule_queue_item(
        &self,
        id: Uuid,
        attempts: i32,
        scheduled_for: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()>;
    async fn mark_queue_item_failed(&self, id: Uuid, attempts: i32, error: &str, at: DateTime<Utc>) -> Result<()>;
    async fn get_queue_item(&self, id: Uuid) -> Result<Option<QueueItem>>;
    async fn queue_stats(&self) -> Result<QueueStats>;

    // subscriptions
    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<PushSubscription>>;
    /// Inserts or, for a known endpoint, rebinds it to the given user and keys.
    async fn upsert_subscription(&self, subscription: &PushSubscription) -> Result<PushSubscription>;
    async fn delete_subscription(&self, user_id: Uuid, endpoint: &str) -> Result<bool>;
    async fn delete_subscription_by_id(&self, id: Uuid) -> Result<()>;
    async fn touch_subscription(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // maintenance
    async fn purge(
        &self,
        read_notifications_before: DateTime<Utc>,
        queue_before: DateTime<Utc>,
    ) -> Result<PurgeSummary>;
}
