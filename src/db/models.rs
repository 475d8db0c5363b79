use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::notifications::quiet_hours::QuietHours;
use crate::notifications::triggers::{NotificationCategory, NotificationType, Priority};

/// In-app notification, one per accepted event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: NotificationType,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub actor_id: Option<Uuid>,
    pub entity_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub dedup_key: String,
    pub group_key: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Open batching window for one (user, group key) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub group_key: String,
    pub event_type: NotificationType,
    /// Events seen in this window, including the one that opened it.
    pub event_count: i32,
    /// Events absorbed after the opener whose push is still owed.
    pub pending_count: i32,
    pub actor_names: Vec<String>,
    /// Template variables of the most recent event.
    pub data: HashMap<String, String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub flushed_at: Option<DateTime<Utc>>,
}

impl NotificationGroup {
    pub fn open(
        user_id: Uuid,
        group_key: String,
        event_type: NotificationType,
        actor_name: Option<String>,
        data: HashMap<String, String>,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            group_key,
            event_type,
            event_count: 1,
            pending_count: 0,
            actor_names: actor_name.into_iter().collect(),
            data,
            window_start: now,
            window_end: now + window,
            flushed_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupUpsert {
    pub group: NotificationGroup,
    /// True when this call opened the window.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status: {}", other)),
        }
    }
}

/// Body of a push message as the service worker receives it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub tag: Option<String>,
    pub notification_id: Option<Uuid>,
    pub event_type: NotificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_id: Option<Uuid>,
    pub payload: PushPayload,
    pub priority: Priority,
    pub status: QueueStatus,
    /// Failed delivery attempts so far.
    pub attempts: i32,
    pub respects_quiet_hours: bool,
    pub scheduled_for: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(
        user_id: Uuid,
        payload: PushPayload,
        priority: Priority,
        respects_quiet_hours: bool,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            notification_id: payload.notification_id,
            payload,
            priority,
            status: QueueStatus::Pending,
            attempts: 0,
            respects_quiet_hours,
            scheduled_for,
            last_error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl PushSubscription {
    pub fn new(
        user_id: Uuid,
        endpoint: String,
        p256dh: String,
        auth: String,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            endpoint,
            p256dh,
            auth,
            user_agent,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    pub push_enabled: bool,
    pub disabled_categories: Vec<NotificationCategory>,
    pub quiet_hours: Option<QuietHours>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            push_enabled: true,
            disabled_categories: Vec::new(),
            quiet_hours: None,
            updated_at: Utc::now(),
        }
    }

    pub fn allows(&self, category: NotificationCategory) -> bool {
        !self.disabled_categories.contains(&category)
    }

    pub fn quiet_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.quiet_hours.and_then(|q| q.defer_until(now))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurgeSummary {
    pub notifications: u64,
    pub queue_items: u64,
    pub groups: u64,
}
