#![allow(dead_code)]

use async_trait::async_trait;
use notification_server::db::models::{PushPayload, PushSubscription};
use notification_server::db::{MemoryStore, NotificationStore};
use notification_server::error::PushError;
use notification_server::notifications::push::{PushSender, SendOptions};
use notification_server::{AppState, Settings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CRON_SECRET: &str = "test_cron_secret";

/// Push sender that records payloads and answers with a fixed result.
#[derive(Default)]
pub struct RecordingSender {
    pub calls: AtomicUsize,
    pub payloads: Mutex<Vec<PushPayload>>,
    pub fail_with: Mutex<Option<PushError>>,
}

impl RecordingSender {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, error: Option<PushError>) {
        *self.fail_with.lock().unwrap() = error;
    }
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send(
        &self,
        _subscription: &PushSubscription,
        payload: &PushPayload,
        _options: SendOptions,
    ) -> Result<(), PushError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.clone());
        match self.fail_with.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub sender: Arc<RecordingSender>,
}

pub fn test_context() -> TestContext {
    let config = Settings::new_for_test().expect("Failed to load test config");
    let store = Arc::new(MemoryStore::new());
    let sender = Arc::new(RecordingSender::default());
    let state = AppState::with_components(config, store.clone(), sender.clone());
    TestContext { state, store, sender }
}

pub async fn subscribe(store: &MemoryStore, user_id: uuid::Uuid) -> PushSubscription {
    store
        .upsert_subscription(&PushSubscription::new(
            user_id,
            format!("https://push.example/{}", user_id),
            "p256dh-key".to_string(),
            "auth-secret".to_string(),
            None,
        ))
        .await
        .expect("Failed to store subscription")
}
