//! In-memory store used by tests and by clients that run without a durable
//! data path. Same semantics as the file store minus persistence.

use super::{Result, SdkStore, SessionRecord};
use crate::telemetry::TelemetryEvent;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    base_device_id: Option<String>,
    sessions: HashMap<String, SessionRecord>,
    events: VecDeque<TelemetryEvent>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SdkStore for MemoryStore {
    async fn base_device_id(&self) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().base_device_id.clone())
    }

    async fn set_base_device_id(&self, id: &str) -> Result<()> {
        self.state.lock().unwrap().base_device_id = Some(id.to_string());
        Ok(())
    }

    async fn load_session(&self, device_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.state.lock().unwrap().sessions.get(device_id).cloned())
    }

    async fn save_session(&self, device_id: &str, record: &SessionRecord) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(device_id.to_string(), record.clone());
        Ok(())
    }

    async fn remove_session(&self, device_id: &str) -> Result<()> {
        self.state.lock().unwrap().sessions.remove(device_id);
        Ok(())
    }

    async fn append_event(&self, event: &TelemetryEvent) -> Result<()> {
        self.state.lock().unwrap().events.push_back(event.clone());
        Ok(())
    }

    async fn pending_events(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    async fn peek_events(&self, max: usize) -> Vec<TelemetryEvent> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .take(max)
            .cloned()
            .collect()
    }

    async fn remove_events(&self, count: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let count = count.min(state.events.len());
        state.events.drain(..count);
        Ok(())
    }
}
