//! Durable local state: per-device session records and the offline telemetry
//! queue. Everything here must tolerate missing or corrupt data by degrading
//! to empty/default state; a broken store never fails a connect.

pub mod filestore;
pub mod memory;

pub use filestore::FileStore;
pub use memory::MemoryStore;

use crate::telemetry::TelemetryEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// State remembered per effective device id so that re-authentication is not
/// required every process start and event ordinals survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub cookie: String,
    pub game_session_event_order: i64,
    pub total_time_played: f64,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            cookie: String::new(),
            game_session_event_order: 1,
            total_time_played: 0.0,
        }
    }
}

/// Storage backend for one client instance.
///
/// The telemetry queue keeps finalized events in save order; `peek_events` /
/// `remove_events` operate on the queue head so a failed upload leaves the
/// queue untouched for retry.
#[async_trait]
pub trait SdkStore: Send + Sync {
    /// Installation-scoped device id, generated on first connect.
    async fn base_device_id(&self) -> Result<Option<String>>;
    async fn set_base_device_id(&self, id: &str) -> Result<()>;

    async fn load_session(&self, device_id: &str) -> Result<Option<SessionRecord>>;
    async fn save_session(&self, device_id: &str, record: &SessionRecord) -> Result<()>;
    async fn remove_session(&self, device_id: &str) -> Result<()>;

    async fn append_event(&self, event: &TelemetryEvent) -> Result<()>;
    async fn pending_events(&self) -> usize;
    async fn peek_events(&self, max: usize) -> Vec<TelemetryEvent>;
    async fn remove_events(&self, count: usize) -> Result<()>;
}
