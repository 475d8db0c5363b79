//! Database module
//!
//! Row models, the `NotificationStore` seam, and its Postgres and in-memory
//! implementations.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;
#[cfg(test)]
pub mod testing;

pub use memory::MemoryStore;
pub use models::{
    Notification, NotificationGroup, NotificationPreferences, PushPayload, PushSubscription,
    QueueItem, QueueStats, QueueStatus,
};
pub use postgres::PgStore;
pub use store::NotificationStore;
