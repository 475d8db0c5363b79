use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::models::{
    GroupUpsert, Notification, NotificationGroup, NotificationPreferences, PurgeSummary,
    PushPayload, PushSubscription, QueueItem, QueueStats, QueueStatus,
};
use crate::db::store::NotificationStore;
use crate::error::{AppError, DatabaseError};
use crate::notifications::quiet_hours::QuietHours;
use crate::Result;

fn corrupt(err: String) -> AppError {
    AppError::DatabaseError(DatabaseError::CorruptRow(err))
}

#[derive(Debug, FromRow)]
struct PreferencesRow {
    user_id: Uuid,
    push_enabled: bool,
    disabled_categories: Vec<String>,
    quiet_start: Option<NaiveTime>,
    quiet_end: Option<NaiveTime>,
    utc_offset_minutes: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PreferencesRow> for NotificationPreferences {
    type Error = AppError;

    fn try_from(row: PreferencesRow) -> Result<Self> {
        let disabled_categories = row
            .disabled_categories
            .iter()
            .map(|c| c.parse().map_err(corrupt))
            .collect::<Result<Vec<_>>>()?;
        let quiet_hours = match (row.quiet_start, row.quiet_end) {
            (Some(start), Some(end)) => Some(QuietHours {
                start,
                end,
                utc_offset_minutes: row.utc_offset_minutes,
            }),
            _ => None,
        };
        Ok(NotificationPreferences {
            user_id: row.user_id,
            push_enabled: row.push_enabled,
            disabled_categories,
            quiet_hours,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    event_type: String,
    title: String,
    body: String,
    url: Option<String>,
    actor_id: Option<Uuid>,
    entity_id: Option<String>,
    dedup_key: String,
    group_key: Option<String>,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            event_type: row.event_type.parse().map_err(corrupt)?,
            title: row.title,
            body: row.body,
            url: row.url,
            actor_id: row.actor_id,
            entity_id: row.entity_id,
            dedup_key: row.dedup_key,
            group_key: row.group_key,
            read_at: row.read_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct GroupRow {
    id: Uuid,
    user_id: Uuid,
    group_key: String,
    event_type: String,
    event_count: i32,
    pending_count: i32,
    actor_names: Vec<String>,
    data: Json<HashMap<String, String>>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    flushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct UpsertedGroupRow {
    #[sqlx(flatten)]
    group: GroupRow,
    created: bool,
}

impl TryFrom<GroupRow> for NotificationGroup {
    type Error = AppError;

    fn try_from(row: GroupRow) -> Result<Self> {
        Ok(NotificationGroup {
            id: row.id,
            user_id: row.user_id,
            group_key: row.group_key,
            event_type: row.event_type.parse().map_err(corrupt)?,
            event_count: row.event_count,
            pending_count: row.pending_count,
            actor_names: row.actor_names,
            data: row.data.0,
            window_start: row.window_start,
            window_end: row.window_end,
            flushed_at: row.flushed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct QueueRow {
    id: Uuid,
    user_id: Uuid,
    notification_id: Option<Uuid>,
    payload: Json<PushPayload>,
    priority: String,
    status: String,
    attempts: i32,
    respects_quiet_hours: bool,
    scheduled_for: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = AppError;

    fn try_from(row: QueueRow) -> Result<Self> {
        Ok(QueueItem {
            id: row.id,
            user_id: row.user_id,
            notification_id: row.notification_id,
            payload: row.payload.0,
            priority: row.priority.parse().map_err(corrupt)?,
            status: row.status.parse::<QueueStatus>().map_err(corrupt)?,
            attempts: row.attempts,
            respects_quiet_hours: row.respects_quiet_hours,
            scheduled_for: row.scheduled_for,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    endpoint: String,
    p256dh: String,
    auth: String,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<SubscriptionRow> for PushSubscription {
    fn from(row: SubscriptionRow) -> Self {
        PushSubscription {
            id: row.id,
            user_id: row.user_id,
            endpoint: row.endpoint,
            p256dh: row.p256dh,
            auth: row.auth,
            user_agent: row.user_agent,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(DatabaseError::ConnectionError(e.to_string())))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>> {
        let row = sqlx::query_as::<_, PreferencesRow>(
            "SELECT * FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(NotificationPreferences::try_from).transpose()
    }

    async fn upsert_preferences(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences> {
        let categories: Vec<String> = prefs
            .disabled_categories
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        let row = sqlx::query_as::<_, PreferencesRow>(
            r#"
            INSERT INTO notification_preferences
                (user_id, push_enabled, disabled_categories, quiet_start, quiet_end, utc_offset_minutes, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                push_enabled = EXCLUDED.push_enabled,
                disabled_categories = EXCLUDED.disabled_categories,
                quiet_start = EXCLUDED.quiet_start,
                quiet_end = EXCLUDED.quiet_end,
                utc_offset_minutes = EXCLUDED.utc_offset_minutes,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(prefs.user_id)
        .bind(prefs.push_enabled)
        .bind(&categories)
        .bind(prefs.quiet_hours.map(|q| q.start))
        .bind(prefs.quiet_hours.map(|q| q.end))
        .bind(prefs.quiet_hours.map(|q| q.utc_offset_minutes).unwrap_or(0))
        .bind(prefs.updated_at)
        .fetch_one(self.pool())
        .await?;

        row.try_into()
    }

    async fn has_recent_duplicate(&self, user_id: Uuid, dedup_key: &str, since: DateTime<Utc>) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notifications
                WHERE user_id = $1 AND dedup_key = $2 AND created_at >= $3
            )
            "#,
        )
        .bind(user_id)
        .bind(dedup_key)
        .bind(since)
        .fetch_one(self.pool())
        .await?;

        Ok(exists)
    }

    async fn insert_notification(&self, n: &Notification) -> Result<Notification> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            INSERT INTO notifications
                (id, user_id, event_type, title, body, url, actor_id, entity_id, dedup_key, group_key, read_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(n.id)
        .bind(n.user_id)
        .bind(n.event_type.as_str())
        .bind(&n.title)
        .bind(&n.body)
        .bind(&n.url)
        .bind(n.actor_id)
        .bind(&n.entity_id)
        .bind(&n.dedup_key)
        .bind(&n.group_key)
        .bind(n.read_at)
        .bind(n.created_at)
        .fetch_one(self.pool())
        .await?;

        row.try_into()
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT * FROM notifications
            WHERE user_id = $1 AND ($2 = FALSE OR read_at IS NULL)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    async fn count_unread(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = COALESCE(read_at, $3) WHERE id = $1 AND user_id = $2",
        )
        .bind(notification_id)
        .bind(user_id)
        .bind(at)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = $2 WHERE user_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .bind(at)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_group(&self, candidate: &NotificationGroup, actor_name: Option<&str>) -> Result<GroupUpsert> {
        // xmax is zero only for freshly inserted tuples.
        let row = sqlx::query_as::<_, UpsertedGroupRow>(
            r#"
            INSERT INTO notification_groups
                (id, user_id, group_key, event_type, event_count, pending_count, actor_names, data, window_start, window_end)
            VALUES ($1, $2, $3, $4, 1, 0, $5, $6, $7, $8)
            ON CONFLICT (user_id, group_key) WHERE flushed_at IS NULL
            DO UPDATE SET
                event_count = notification_groups.event_count + 1,
                pending_count = notification_groups.pending_count + 1,
                actor_names = CASE
                    WHEN $9::TEXT IS NULL THEN notification_groups.actor_names
                    ELSE array_append(notification_groups.actor_names, $9::TEXT)
                END,
                data = EXCLUDED.data
            RETURNING *, (xmax = 0) AS created
            "#,
        )
        .bind(candidate.id)
        .bind(candidate.user_id)
        .bind(&candidate.group_key)
        .bind(candidate.event_type.as_str())
        .bind(&candidate.actor_names)
        .bind(Json(&candidate.data))
        .bind(candidate.window_start)
        .bind(candidate.window_end)
        .bind(actor_name)
        .fetch_one(self.pool())
        .await?;

        Ok(GroupUpsert {
            created: row.created,
            group: row.group.try_into()?,
        })
    }

    async fn claim_due_groups(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<NotificationGroup>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            UPDATE notification_groups SET flushed_at = $1
            WHERE id IN (
                SELECT id FROM notification_groups
                WHERE flushed_at IS NULL AND window_end <= $1
                ORDER BY window_end
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    async fn enqueue(&self, item: &QueueItem) -> Result<QueueItem> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            INSERT INTO notification_queue
                (id, user_id, notification_id, payload, priority, status, attempts,
                 respects_quiet_hours, scheduled_for, last_error, created_at, updated_at, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(item.id)
        .bind(item.user_id)
        .bind(item.notification_id)
        .bind(Json(&item.payload))
        .bind(item.priority.as_str())
        .bind(item.status.as_str())
        .bind(item.attempts)
        .bind(item.respects_quiet_hours)
        .bind(item.scheduled_for)
        .bind(&item.last_error)
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(item.sent_at)
        .fetch_one(self.pool())
        .await?;

        row.try_into()
    }

    async fn claim_due_queue_items(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE notification_queue SET status = 'processing', updated_at = $1
            WHERE id IN (
                SELECT id FROM notification_queue
                WHERE status = 'pending' AND scheduled_for <= $1
                ORDER BY scheduled_for
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    async fn release_stale_queue_items(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notification_queue SET status = 'pending' WHERE status = 'processing' AND updated_at < $1",
        )
        .bind(older_than)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_queue_item_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE notification_queue SET status = 'sent', sent_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn reschedule_queue_item(
        &self,
        id: Uuid,
        attempts: i32,
        scheduled_for: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_queue SET
                status = 'pending',
                attempts = $2,
                scheduled_for = $3,
                last_error = COALESCE($4, last_error),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(scheduled_for)
        .bind(last_error)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn mark_queue_item_failed(&self, id: Uuid, attempts: i32, error: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_queue SET status = 'failed', attempts = $2, last_error = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .bind(at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn get_queue_item(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM notification_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(QueueItem::try_from).transpose()
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM notification_queue GROUP BY status",
        )
        .fetch_all(self.pool())
        .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.parse::<QueueStatus>().map_err(corrupt)? {
                QueueStatus::Pending => stats.pending = count,
                QueueStatus::Processing => stats.processing = count,
                QueueStatus::Sent => stats.sent = count,
                QueueStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<PushSubscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM push_subscriptions WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(PushSubscription::from).collect())
    }

    async fn upsert_subscription(&self, s: &PushSubscription) -> Result<PushSubscription> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (endpoint) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                p256dh = EXCLUDED.p256dh,
                auth = EXCLUDED.auth,
                user_agent = EXCLUDED.user_agent
            RETURNING *
            "#,
        )
        .bind(s.id)
        .bind(s.user_id)
        .bind(&s.endpoint)
        .bind(&s.p256dh)
        .bind(&s.auth)
        .bind(&s.user_agent)
        .bind(s.created_at)
        .fetch_one(self.pool())
        .await?;

        Ok(row.into())
    }

    async fn delete_subscription(&self, user_id: Uuid, endpoint: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE user_id = $1 AND endpoint = $2")
            .bind(user_id)
            .bind(endpoint)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_subscription_by_id(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM push_subscriptions WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    async fn touch_subscription(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE push_subscriptions SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    async fn purge(
        &self,
        read_notifications_before: DateTime<Utc>,
        queue_before: DateTime<Utc>,
    ) -> Result<PurgeSummary> {
        let mut transaction = self.pool.begin().await?;

        let notifications = sqlx::query(
            "DELETE FROM notifications WHERE read_at IS NOT NULL AND created_at < $1",
        )
        .bind(read_notifications_before)
        .execute(&mut *transaction)
        .await?
        .rows_affected();

        let queue_items = sqlx::query(
            "DELETE FROM notification_queue WHERE status IN ('sent', 'failed') AND updated_at < $1",
        )
        .bind(queue_before)
        .execute(&mut *transaction)
        .await?
        .rows_affected();

        let groups = sqlx::query(
            "DELETE FROM notification_groups WHERE flushed_at IS NOT NULL AND flushed_at < $1",
        )
        .bind(queue_before)
        .execute(&mut *transaction)
        .await?
        .rows_affected();

        transaction.commit().await?;

        Ok(PurgeSummary { notifications, queue_items, groups })
    }
}
