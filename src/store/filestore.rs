//! File-backed store: `session.json` for per-device records and
//! `events.jsonl` for the telemetry queue (one JSON document per line).
//!
//! Appends are flushed as they happen; rewrites (queue compaction, session
//! updates) go through a temp file followed by an atomic rename so a crash
//! mid-write leaves the previous state intact.

use super::{Result, SdkStore, SessionRecord, StoreError};
use crate::telemetry::TelemetryEvent;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const SESSION_FILE: &str = "session.json";
const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    base_device_id: Option<String>,
    #[serde(default)]
    sessions: HashMap<String, SessionRecord>,
}

pub struct FileStore {
    base_path: PathBuf,
    state: Mutex<PersistedState>,
    events: Mutex<VecDeque<TelemetryEvent>>,
}

impl FileStore {
    /// Opens (or creates) a store rooted at `path`. Missing files start
    /// empty; corrupt files are logged and discarded rather than failing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = path.into();
        fs::create_dir_all(&base_path).await?;

        let state = load_state(&base_path.join(SESSION_FILE)).await;
        let events = load_events(&base_path.join(EVENTS_FILE)).await;

        Ok(Self {
            base_path,
            state: Mutex::new(state),
            events: Mutex::new(events),
        })
    }

    fn session_path(&self) -> PathBuf {
        self.base_path.join(SESSION_FILE)
    }

    fn events_path(&self) -> PathBuf {
        self.base_path.join(EVENTS_FILE)
    }

    async fn persist_state(&self, state: &PersistedState) -> Result<()> {
        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        write_atomic(&self.session_path(), &data).await
    }

    async fn rewrite_events(&self, events: &VecDeque<TelemetryEvent>) -> Result<()> {
        let mut data = Vec::new();
        for event in events {
            let line = serde_json::to_string(event)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            data.extend_from_slice(line.as_bytes());
            data.push(b'\n');
        }
        write_atomic(&self.events_path(), &data).await
    }
}

async fn load_state(path: &Path) -> PersistedState {
    match fs::read(path).await {
        Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
            warn!(target: "Store/File", "Discarding corrupt session state at {path:?}: {e}");
            PersistedState::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
        Err(e) => {
            warn!(target: "Store/File", "Could not read session state at {path:?}: {e}");
            PersistedState::default()
        }
    }
}

async fn load_events(path: &Path) -> VecDeque<TelemetryEvent> {
    let data = match fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(target: "Store/File", "Could not read event queue at {path:?}: {e}");
            }
            return VecDeque::new();
        }
    };

    let mut events = VecDeque::new();
    for line in data.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TelemetryEvent>(line) {
            Ok(event) => events.push_back(event),
            // A torn append leaves at most one bad line; keep the rest.
            Err(e) => warn!(target: "Store/File", "Skipping corrupt queued event: {e}"),
        }
    }
    events
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl SdkStore for FileStore {
    async fn base_device_id(&self) -> Result<Option<String>> {
        Ok(self.state.lock().await.base_device_id.clone())
    }

    async fn set_base_device_id(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.base_device_id = Some(id.to_string());
        self.persist_state(&state).await
    }

    async fn load_session(&self, device_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.state.lock().await.sessions.get(device_id).cloned())
    }

    async fn save_session(&self, device_id: &str, record: &SessionRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.insert(device_id.to_string(), record.clone());
        self.persist_state(&state).await
    }

    async fn remove_session(&self, device_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.sessions.remove(device_id).is_none() {
            return Ok(());
        }
        self.persist_state(&state).await
    }

    async fn append_event(&self, event: &TelemetryEvent) -> Result<()> {
        let mut events = self.events.lock().await;

        let mut line =
            serde_json::to_string(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        events.push_back(event.clone());
        Ok(())
    }

    async fn pending_events(&self) -> usize {
        self.events.lock().await.len()
    }

    async fn peek_events(&self, max: usize) -> Vec<TelemetryEvent> {
        self.events.lock().await.iter().take(max).cloned().collect()
    }

    async fn remove_events(&self, count: usize) -> Result<()> {
        let mut events = self.events.lock().await;
        let count = count.min(events.len());
        events.drain(..count);
        self.rewrite_events(&events).await
    }
}
