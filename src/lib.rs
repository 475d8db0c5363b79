pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod notifications;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;
use actix_web::HttpResponse;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

use db::{MemoryStore, NotificationStore, PgStore};
use notifications::{
    Dispatcher, GroupProcessor, HttpPushSender, NotificationOrchestrator, PushDeliveryService,
    PushSender, QueueProcessor,
};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: Arc<dyn NotificationStore>,
    pub orchestrator: Arc<NotificationOrchestrator>,
    pub queue: Arc<QueueProcessor>,
    pub groups: Arc<GroupProcessor>,
}

impl AppState {
    pub async fn new(config: Settings) -> Result<Self> {
        let store: Arc<dyn NotificationStore> = if config.database.is_memory() {
            warn!("Using in-memory notification store; data will not survive a restart");
            Arc::new(MemoryStore::new())
        } else {
            let store = PgStore::connect(
                &config.database.url,
                config.database.max_connections,
                Duration::from_secs(config.database.acquire_timeout_secs),
            )
            .await?;
            if config.database.run_migrations {
                store.migrate().await?;
                info!("Database migrations applied");
            }
            Arc::new(store)
        };

        let sender = Arc::new(HttpPushSender::new(&config.push)?);
        Ok(Self::with_components(config, store, sender))
    }

    /// Wires the pipeline over an existing store and push sender.
    pub fn with_components(
        config: Settings,
        store: Arc<dyn NotificationStore>,
        sender: Arc<dyn PushSender>,
    ) -> Self {
        let delivery = Arc::new(PushDeliveryService::new(
            store.clone(),
            sender,
            config.push.default_ttl_secs,
        ));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), delivery.clone(), config.queue.clone()));

        Self {
            orchestrator: Arc::new(NotificationOrchestrator::new(store.clone(), dispatcher.clone())),
            queue: Arc::new(QueueProcessor::new(store.clone(), delivery, config.queue.clone())),
            groups: Arc::new(GroupProcessor::new(store.clone(), dispatcher, config.groups.batch_size)),
            store,
            config: Arc::new(config),
        }
    }

    /// One pass of the background work the cron endpoints expose: flush due
    /// groups, then drain the retry queue.
    pub async fn run_scheduled(&self, now: DateTime<Utc>) {
        if let Err(e) = self.groups.process_due_groups(now).await {
            error!("Scheduled group flush failed: {}", e);
        }
        if let Err(e) = self.queue.process_queue(now).await {
            error!("Scheduled queue run failed: {}", e);
        }
    }
}
