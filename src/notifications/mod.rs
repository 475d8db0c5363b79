//! Notification orchestration
//!
//! Trigger config → dedup → grouping → quiet hours → push, with a retry
//! queue and a group flusher that cron (or the in-process scheduler) drives.

pub mod dispatch;
pub mod groups;
pub mod maintenance;
pub mod orchestrator;
pub mod push;
pub mod queue;
pub mod quiet_hours;
pub mod triggers;

pub use dispatch::{Dispatch, Dispatcher};
pub use groups::{GroupProcessor, GroupRunSummary};
pub use orchestrator::{NotificationEvent, NotificationOrchestrator, TriggerOutcome};
pub use push::{DeliveryReport, HttpPushSender, PushDeliveryService, PushSender};
pub use queue::{QueueProcessor, QueueRunSummary};
pub use quiet_hours::QuietHours;
pub use triggers::{NotificationCategory, NotificationType, Priority};
