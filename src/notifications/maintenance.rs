use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::config::RetentionConfig;
use crate::db::models::PurgeSummary;
use crate::db::store::NotificationStore;
use crate::Result;

/// Drops read notifications, finished queue items and flushed groups past
/// their retention.
pub async fn purge(
    store: &dyn NotificationStore,
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<PurgeSummary> {
    let summary = store
        .purge(
            now - Duration::days(retention.notification_days),
            now - Duration::days(retention.queue_days),
        )
        .await?;

    info!(
        "Purged {} notifications, {} queue items, {} groups",
        summary.notifications, summary.queue_items, summary.groups
    );
    Ok(summary)
}
