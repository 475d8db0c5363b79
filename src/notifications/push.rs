//! Push delivery: sending one payload to every subscription a user holds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PushConfig;
use crate::db::models::{PushPayload, PushSubscription};
use crate::db::store::NotificationStore;
use crate::error::{AppError, PushError};
use crate::notifications::triggers::Priority;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub ttl_secs: u32,
    pub priority: Priority,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
        options: SendOptions,
    ) -> std::result::Result<(), PushError>;
}

/// Posts payloads straight to the subscription endpoint.
pub struct HttpPushSender {
    client: reqwest::Client,
    gateway_key: String,
}

impl HttpPushSender {
    pub fn new(config: &PushConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            gateway_key: config.gateway_key.clone(),
        })
    }

    fn classify(status: StatusCode) -> std::result::Result<(), PushError> {
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(PushError::Gone),
            StatusCode::TOO_MANY_REQUESTS => Err(PushError::Transport("rate limited".to_string())),
            s if s.is_client_error() => Err(PushError::Rejected(s.as_u16())),
            s => Err(PushError::Transport(format!("push service returned {}", s.as_u16()))),
        }
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
        options: SendOptions,
    ) -> std::result::Result<(), PushError> {
        let mut request = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", options.ttl_secs.to_string())
            .header("Urgency", options.priority.as_str())
            .json(payload);

        if let Some(tag) = &payload.tag {
            request = request.header("Topic", topic_header(tag));
        }
        if !self.gateway_key.is_empty() {
            request = request.header("Authorization", format!("key={}", self.gateway_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        Self::classify(response.status())
    }
}

/// Topic header values are limited to 32 URL-safe characters.
fn topic_header(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(32)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub sent: u32,
    pub expired: u32,
    /// Transient failures.
    pub failed: u32,
    pub rejected: u32,
}

impl DeliveryReport {
    pub fn should_retry(&self) -> bool {
        self.sent == 0 && self.failed > 0
    }

    /// Nothing was sent and every live subscription refused the payload.
    pub fn is_rejected(&self) -> bool {
        self.sent == 0 && self.failed == 0 && self.rejected > 0
    }
}

pub struct PushDeliveryService {
    store: Arc<dyn NotificationStore>,
    sender: Arc<dyn PushSender>,
    default_ttl_secs: u32,
}

impl PushDeliveryService {
    pub fn new(store: Arc<dyn NotificationStore>, sender: Arc<dyn PushSender>, default_ttl_secs: u32) -> Self {
        Self { store, sender, default_ttl_secs }
    }

    /// Sends `payload` to all of the user's subscriptions. Subscriptions the
    /// push service reports as gone are deleted.
    pub async fn deliver(
        &self,
        user_id: Uuid,
        payload: &PushPayload,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<(DeliveryReport, Option<String>)> {
        let subscriptions = self.store.list_subscriptions(user_id).await?;
        if subscriptions.is_empty() {
            debug!("No push subscriptions for user {}", user_id);
            return Ok((DeliveryReport::default(), None));
        }

        let options = SendOptions { ttl_secs: self.default_ttl_secs, priority };
        let results = join_all(
            subscriptions
                .iter()
                .map(|s| self.sender.send(s, payload, options)),
        )
        .await;

        let mut report = DeliveryReport::default();
        let mut last_error = None;
        for (subscription, result) in subscriptions.iter().zip(results) {
            match result {
                Ok(()) => {
                    report.sent += 1;
                    if let Err(e) = self.store.touch_subscription(subscription.id, now).await {
                        warn!("Failed to record use of push subscription {}: {}", subscription.id, e);
                    }
                }
                Err(PushError::Gone) => {
                    report.expired += 1;
                    info!("Removing expired push subscription {} for user {}", subscription.id, user_id);
                    self.store.delete_subscription_by_id(subscription.id).await?;
                }
                Err(e) => {
                    warn!("Push to subscription {} failed: {}", subscription.id, e);
                    if e.is_transient() {
                        report.failed += 1;
                    } else {
                        report.rejected += 1;
                    }
                    last_error = Some(e.to_string());
                }
            }
        }

        Ok((report, last_error))
    }
}

/// Endpoint must be absolute https; plain http is accepted only for local
/// development hosts.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = url::Url::parse(endpoint)?;
    let local = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
    match url.scheme() {
        "https" => Ok(()),
        "http" if local => Ok(()),
        other => Err(AppError::ValidationError(format!(
            "push endpoint must use https, got {}",
            other
        ))),
    }
}
