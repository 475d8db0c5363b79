//! Entry point for domain events: dedup, in-app storage, grouping and the
//! first push attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::{Notification, NotificationGroup, NotificationPreferences, PushPayload};
use crate::db::store::NotificationStore;
use crate::notifications::dispatch::{Dispatch, Dispatcher};
use crate::notifications::push::DeliveryReport;
use crate::notifications::triggers::{render, NotificationCategory, NotificationType, TriggerConfig};
use crate::validation;
use crate::Result;

const MAX_DATA_VALUE_LEN: usize = 500;
const MAX_DATA_ENTRIES: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: NotificationType,
    pub recipient_id: Uuid,
    #[serde(default)]
    pub actor_id: Option<Uuid>,
    #[serde(default)]
    pub actor_name: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl NotificationEvent {
    pub fn new(event_type: NotificationType, recipient_id: Uuid) -> Self {
        Self {
            event_type,
            recipient_id,
            actor_id: None,
            actor_name: None,
            entity_id: None,
            data: HashMap::new(),
        }
    }

    pub fn actor(mut self, id: Uuid, name: &str) -> Self {
        self.actor_id = Some(id);
        self.actor_name = Some(name.to_string());
        self
    }

    pub fn entity(mut self, entity_id: &str) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.len() > MAX_DATA_ENTRIES {
            return Err(crate::AppError::ValidationError(format!(
                "at most {} data entries allowed",
                MAX_DATA_ENTRIES
            )));
        }
        if let Some(name) = &self.actor_name {
            validation::validate_text_field("actor_name", name, 100)?;
        }
        if let Some(entity) = &self.entity_id {
            validation::validate_text_field("entity_id", entity, 100)?;
        }
        for (key, value) in &self.data {
            validation::validate_text_field(key, value, MAX_DATA_VALUE_LEN)?;
        }
        Ok(())
    }

    /// Stable identity of "the same thing happening again".
    pub fn dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.recipient_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.event_type.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.entity_id.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        if let Some(actor) = self.actor_id {
            hasher.update(actor.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn group_key(&self) -> String {
        format!("{}:{}", self.event_type, self.entity_id.as_deref().unwrap_or("all"))
    }

    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = self.data.clone();
        if let Some(name) = &self.actor_name {
            vars.insert("actor_name".to_string(), name.clone());
        }
        if let Some(entity) = &self.entity_id {
            vars.entry("entity_id".to_string()).or_insert_with(|| entity.clone());
        }
        vars
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Actor and recipient are the same user.
    Skipped,
    Suppressed { category: NotificationCategory },
    Duplicate,
    /// Stored in-app; push owed by the group summary.
    Grouped { notification_id: Uuid, group_id: Uuid, pending: i32 },
    /// Stored in-app; the user has push turned off.
    Stored { notification_id: Uuid },
    /// Stored in-app; push waits out the user's quiet hours.
    Deferred { notification_id: Uuid, queue_item_id: Uuid, until: DateTime<Utc> },
    /// Stored in-app; the push failed transiently and sits in the retry queue.
    Queued { notification_id: Uuid, queue_item_id: Uuid, retry_at: DateTime<Utc> },
    Delivered { notification_id: Uuid, report: DeliveryReport },
}

impl TriggerOutcome {
    fn dispatched(notification_id: Uuid, dispatch: Dispatch) -> Self {
        match dispatch {
            Dispatch::Disabled => TriggerOutcome::Stored { notification_id },
            Dispatch::Deferred { queue_item_id, until } => {
                TriggerOutcome::Deferred { notification_id, queue_item_id, until }
            }
            Dispatch::Queued { queue_item_id, retry_at } => {
                TriggerOutcome::Queued { notification_id, queue_item_id, retry_at }
            }
            Dispatch::Delivered { report } => TriggerOutcome::Delivered { notification_id, report },
        }
    }
}

pub struct NotificationOrchestrator {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<Dispatcher>,
}

impl NotificationOrchestrator {
    pub fn new(store: Arc<dyn NotificationStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn preferences(&self, user_id: Uuid) -> Result<NotificationPreferences> {
        Ok(self
            .store
            .get_preferences(user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferences::defaults_for(user_id)))
    }

    pub async fn trigger(&self, event: NotificationEvent) -> Result<TriggerOutcome> {
        self.trigger_at(event, Utc::now()).await
    }

    pub async fn trigger_at(&self, event: NotificationEvent, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        let config = event.event_type.config();
        let recipient = event.recipient_id;

        if event.actor_id == Some(recipient) {
            debug!("Skipping self-notification {} for user {}", event.event_type, recipient);
            return Ok(TriggerOutcome::Skipped);
        }

        event.validate()?;

        let prefs = self.preferences(recipient).await?;
        if !prefs.allows(config.category) {
            info!("User {} disabled {} notifications", recipient, config.category.as_str());
            return Ok(TriggerOutcome::Suppressed { category: config.category });
        }

        let dedup_key = event.dedup_key();
        if config.dedup_window > Duration::zero()
            && self
                .store
                .has_recent_duplicate(recipient, &dedup_key, now - config.dedup_window)
                .await?
        {
            info!("Duplicate {} for user {} within {}m", event.event_type, recipient, config.dedup_window.num_minutes());
            return Ok(TriggerOutcome::Duplicate);
        }

        let vars = event.template_vars();
        let group_key = config.grouping.as_ref().map(|_| event.group_key());
        let notification = self
            .store
            .insert_notification(&build_notification(&event, config, &vars, dedup_key, group_key.clone(), now))
            .await?;

        if let (Some(policy), Some(group_key)) = (&config.grouping, group_key.clone()) {
            let candidate = NotificationGroup::open(
                recipient,
                group_key,
                event.event_type,
                event.actor_name.clone(),
                vars.clone(),
                now,
                policy.window,
            );
            let upsert = self.store.upsert_group(&candidate, event.actor_name.as_deref()).await?;
            if !upsert.created {
                info!(
                    "Grouped {} for user {} into {} ({} pending)",
                    event.event_type, recipient, upsert.group.id, upsert.group.pending_count
                );
                return Ok(TriggerOutcome::Grouped {
                    notification_id: notification.id,
                    group_id: upsert.group.id,
                    pending: upsert.group.pending_count,
                });
            }
        }

        let payload = PushPayload {
            title: notification.title.clone(),
            body: notification.body.clone(),
            url: notification.url.clone(),
            tag: Some(group_key.unwrap_or_else(|| event.group_key())),
            notification_id: Some(notification.id),
            event_type: event.event_type,
            count: None,
        };
        let dispatch = self
            .dispatcher
            .dispatch(&prefs, payload, config.priority, config.respects_quiet_hours, now)
            .await?;

        info!("Notification {} for user {}: {:?}", notification.id, recipient, dispatch);
        Ok(TriggerOutcome::dispatched(notification.id, dispatch))
    }
}

fn build_notification(
    event: &NotificationEvent,
    config: &TriggerConfig,
    vars: &HashMap<String, String>,
    dedup_key: String,
    group_key: Option<String>,
    now: DateTime<Utc>,
) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        user_id: event.recipient_id,
        event_type: event.event_type,
        title: render(config.title, vars),
        body: render(config.body, vars),
        url: config.url.map(|u| render(u, vars)),
        actor_id: event.actor_id,
        entity_id: event.entity_id.clone(),
        dedup_key,
        group_key,
        read_at: None,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::db::memory::MemoryStore;
    use crate::db::models::PushSubscription;
    use crate::error::PushError;
    use crate::notifications::groups::GroupProcessor;
    use crate::notifications::push::{DeliveryReport, MockPushSender, PushDeliveryService, PushSender};
    use crate::notifications::quiet_hours::QuietHours;
    use chrono::{NaiveTime, TimeZone};

    struct Harness {
        store: Arc<MemoryStore>,
        orchestrator: NotificationOrchestrator,
    }

    fn harness(sender: impl PushSender + 'static) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let delivery = Arc::new(PushDeliveryService::new(store.clone(), Arc::new(sender), 60));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), delivery, QueueConfig::default()));
        let orchestrator = NotificationOrchestrator::new(store.clone(), dispatcher);
        Harness { store, orchestrator }
    }

    fn ok_sender() -> MockPushSender {
        let mut sender = MockPushSender::new();
        sender.expect_send().returning(|_, _, _| Ok(()));
        sender
    }

    async fn subscribe(store: &MemoryStore, user: Uuid) {
        store
            .upsert_subscription(&PushSubscription::new(
                user,
                format!("https://push.example/{}", user),
                "key".into(),
                "auth".into(),
                None,
            ))
            .await
            .unwrap();
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn reply(recipient: Uuid, actor: Uuid, name: &str) -> NotificationEvent {
        NotificationEvent::new(NotificationType::CommentReply, recipient)
            .actor(actor, name)
            .entity("post-42")
            .with("post_title", "Resume tips")
            .with("post_id", "42")
    }

    #[tokio::test]
    async fn test_delivers_and_renders() {
        let h = harness(ok_sender());
        let user = Uuid::new_v4();
        subscribe(&h.store, user).await;

        let outcome = h.orchestrator.trigger_at(reply(user, Uuid::new_v4(), "Ada"), noon()).await.unwrap();
        match outcome {
            TriggerOutcome::Delivered { report, .. } => {
                assert_eq!(report, DeliveryReport { sent: 1, expired: 0, failed: 0, rejected: 0 });
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let inbox = h.store.list_notifications(user, 10, 0, false).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].body, "Ada replied to your comment on \"Resume tips\"");
        assert_eq!(inbox[0].url.as_deref(), Some("/community/posts/42"));
    }

    #[tokio::test]
    async fn test_self_notification_skipped() {
        let h = harness(ok_sender());
        let user = Uuid::new_v4();
        let outcome = h.orchestrator.trigger_at(reply(user, user, "Me"), noon()).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::Skipped);
        assert_eq!(h.store.count_unread(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disabled_category_suppressed() {
        let h = harness(ok_sender());
        let user = Uuid::new_v4();
        let mut prefs = NotificationPreferences::defaults_for(user);
        prefs.disabled_categories = vec![NotificationCategory::Community];
        h.store.upsert_preferences(&prefs).await.unwrap();

        let outcome = h.orchestrator.trigger_at(reply(user, Uuid::new_v4(), "Ada"), noon()).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::Suppressed { category: NotificationCategory::Community });
    }

    #[tokio::test]
    async fn test_duplicate_within_window() {
        let h = harness(ok_sender());
        let user = Uuid::new_v4();
        let mentee = Uuid::new_v4();
        let event = NotificationEvent::new(NotificationType::MentorRequest, user).actor(mentee, "Lin");

        let first = h.orchestrator.trigger_at(event.clone(), noon()).await.unwrap();
        assert!(matches!(first, TriggerOutcome::Delivered { .. }));

        let again = h
            .orchestrator
            .trigger_at(event.clone(), noon() + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(again, TriggerOutcome::Duplicate);

        let later = h
            .orchestrator
            .trigger_at(event, noon() + Duration::minutes(61))
            .await
            .unwrap();
        assert!(matches!(later, TriggerOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn test_grouping_absorbs_followups() {
        let h = harness(ok_sender());
        let user = Uuid::new_v4();
        subscribe(&h.store, user).await;

        let first = h.orchestrator.trigger_at(reply(user, Uuid::new_v4(), "Ada"), noon()).await.unwrap();
        assert!(matches!(first, TriggerOutcome::Delivered { .. }));

        let second = h
            .orchestrator
            .trigger_at(reply(user, Uuid::new_v4(), "Grace"), noon() + Duration::minutes(2))
            .await
            .unwrap();
        match second {
            TriggerOutcome::Grouped { pending, .. } => assert_eq!(pending, 1),
            other => panic!("unexpected outcome {:?}", other),
        }

        // Both still land in the inbox.
        assert_eq!(h.store.count_unread(user).await.unwrap(), 2);
        let groups = h.store.groups().await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].actor_names, vec!["Ada", "Grace"]);
    }

    #[tokio::test]
    async fn test_late_event_joins_unflushed_summary() {
        let mut sender = MockPushSender::new();
        sender.expect_send().times(2).returning(|_, _, _| Ok(()));
        let store = Arc::new(MemoryStore::new());
        let delivery = Arc::new(PushDeliveryService::new(store.clone(), Arc::new(sender), 60));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), delivery, QueueConfig::default()));
        let orchestrator = NotificationOrchestrator::new(store.clone(), dispatcher.clone());
        let groups = GroupProcessor::new(store.clone(), dispatcher, 100);
        let user = Uuid::new_v4();
        subscribe(&store, user).await;

        let first = orchestrator.trigger_at(reply(user, Uuid::new_v4(), "Ada"), noon()).await.unwrap();
        assert!(matches!(first, TriggerOutcome::Delivered { .. }));

        // Past the 10 minute window, but the group has not been flushed yet.
        let late = orchestrator
            .trigger_at(reply(user, Uuid::new_v4(), "Grace"), noon() + Duration::minutes(12))
            .await
            .unwrap();
        match late {
            TriggerOutcome::Grouped { pending, .. } => assert_eq!(pending, 1),
            other => panic!("unexpected outcome {:?}", other),
        }

        let run = groups.process_due_groups(noon() + Duration::minutes(15)).await.unwrap();
        assert_eq!(run.flushed, 1);
        assert_eq!(run.summaries_sent, 1);
        let flushed = store.groups().await;
        assert_eq!(flushed[0].event_count, 2);
        assert_eq!(flushed[0].actor_names, vec!["Ada", "Grace"]);
    }

    #[tokio::test]
    async fn test_quiet_hours_defer_to_queue() {
        let mut sender = MockPushSender::new();
        sender.expect_send().never();
        let h = harness(sender);
        let user = Uuid::new_v4();
        subscribe(&h.store, user).await;

        let mut prefs = NotificationPreferences::defaults_for(user);
        prefs.quiet_hours = Some(QuietHours {
            start: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            utc_offset_minutes: 0,
        });
        h.store.upsert_preferences(&prefs).await.unwrap();

        let event = NotificationEvent::new(NotificationType::ApplicationStatusChanged, user)
            .entity("app-1")
            .with("job_title", "Backend Engineer")
            .with("status", "interview");
        let outcome = h.orchestrator.trigger_at(event, noon()).await.unwrap();

        match outcome {
            TriggerOutcome::Deferred { until, .. } => {
                assert_eq!(until, Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.store.queue_items().await.len(), 1);
    }

    #[tokio::test]
    async fn test_security_alert_ignores_quiet_hours() {
        let h = harness(ok_sender());
        let user = Uuid::new_v4();
        subscribe(&h.store, user).await;

        let mut prefs = NotificationPreferences::defaults_for(user);
        prefs.quiet_hours = Some(QuietHours {
            start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
            utc_offset_minutes: 0,
        });
        h.store.upsert_preferences(&prefs).await.unwrap();

        let event = NotificationEvent::new(NotificationType::SecurityAlert, user)
            .with("message", "New sign-in from Firefox");
        let outcome = h.orchestrator.trigger_at(event, noon()).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn test_transient_failure_queues_retry() {
        let mut sender = MockPushSender::new();
        sender
            .expect_send()
            .returning(|_, _, _| Err(PushError::Transport("timeout".into())));
        let h = harness(sender);
        let user = Uuid::new_v4();
        subscribe(&h.store, user).await;

        let event = NotificationEvent::new(NotificationType::MentorRequestAccepted, user)
            .actor(Uuid::new_v4(), "Sam");
        let outcome = h.orchestrator.trigger_at(event, noon()).await.unwrap();

        match outcome {
            TriggerOutcome::Queued { retry_at, .. } => {
                assert_eq!(retry_at, noon() + Duration::minutes(1));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let items = h.store.queue_items().await;
        assert_eq!(items[0].attempts, 1);
        assert_eq!(items[0].last_error.as_deref(), Some("Transport error: timeout"));
    }

    #[tokio::test]
    async fn test_push_disabled_still_stores() {
        let mut sender = MockPushSender::new();
        sender.expect_send().never();
        let h = harness(sender);
        let user = Uuid::new_v4();
        let mut prefs = NotificationPreferences::defaults_for(user);
        prefs.push_enabled = false;
        h.store.upsert_preferences(&prefs).await.unwrap();

        let event = NotificationEvent::new(NotificationType::OnboardingReminder, user).with("progress", "60");
        let outcome = h.orchestrator.trigger_at(event, noon()).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Stored { .. }));
        assert_eq!(h.store.count_unread(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injection_in_event_data_rejected() {
        let h = harness(ok_sender());
        let event = NotificationEvent::new(NotificationType::PostComment, Uuid::new_v4())
            .with("post_title", "x'; DROP TABLE users; --");
        let err = h.orchestrator.trigger_at(event, noon()).await.unwrap_err();
        assert!(matches!(err, crate::AppError::ValidationError(_)));
    }

    #[test]
    fn test_dedup_key_distinguishes_actor_and_entity() {
        let user = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let base = NotificationEvent::new(NotificationType::PostUpvote, user).actor(actor, "A").entity("p1");
        let same = base.clone().with("post_title", "different data");
        let other_entity = NotificationEvent::new(NotificationType::PostUpvote, user).actor(actor, "A").entity("p2");
        let other_actor = NotificationEvent::new(NotificationType::PostUpvote, user)
            .actor(Uuid::new_v4(), "A")
            .entity("p1");

        assert_eq!(base.dedup_key(), same.dedup_key());
        assert_ne!(base.dedup_key(), other_entity.dedup_key());
        assert_ne!(base.dedup_key(), other_actor.dedup_key());
        assert_eq!(base.dedup_key().len(), 64);
    }
}
