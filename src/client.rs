//! The caller-owned client handle: public API surface, connection lifecycle
//! and the background polling worker.
//!
//! One `Client` is one session with the backend. Nothing here is a process
//! global; "one session per process" is a usage convention, not an enforced
//! constraint. All request-issuing calls return after enqueueing work, and
//! completion handlers run on the background worker.

use crate::config::{self, POLL_INTERVAL, ThrottleConfig};
use crate::http::{HttpClient, UreqHttpClient};
use crate::request::{
    ApiCall, FollowUp, MessageCode, PendingHandler, ResponseCallback, ResponseEnvelope,
};
use crate::session::{SessionState, UserInfo, extract_session_token};
use crate::store::{FileStore, MemoryStore, SdkStore, SessionRecord};
use crate::telemetry::{TelemetryEvent, TelemetryValue, encode_batch};
use dashmap::DashMap;
use log::{debug, info, warn};
use rand::RngCore;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::{Notify, mpsc};
use tokio::time::sleep;

#[derive(Debug)]
pub(crate) struct GameTimer {
    pub active: bool,
    pub last: Instant,
}

pub struct Client {
    pub(crate) http_client: Arc<dyn HttpClient>,

    pub(crate) session: RwLock<SessionState>,
    pub(crate) throttle: RwLock<ThrottleConfig>,
    pub(crate) store: RwLock<Option<Arc<dyn SdkStore>>>,

    /// Pending completion handlers, one ordered queue per category.
    pub(crate) handlers: DashMap<MessageCode, VecDeque<PendingHandler>>,
    /// One serialized execution lane per category, spawned on first use.
    pub(crate) lanes: DashMap<MessageCode, mpsc::UnboundedSender<ApiCall>>,
    pub(crate) response_tx: mpsc::UnboundedSender<ResponseEnvelope>,
    response_rx: Mutex<Option<mpsc::UnboundedReceiver<ResponseEnvelope>>>,

    /// Fields staged for the next telemetry event.
    staged_values: Mutex<BTreeMap<String, TelemetryValue>>,
    pub(crate) game_timer: Mutex<GameTimer>,
    /// Ordinal of the next event within the current game session.
    pub(crate) event_order: AtomicI64,
    pub(crate) total_time_played: Mutex<f64>,
    last_flush: Mutex<Instant>,
    pub(crate) flush_in_flight: AtomicBool,

    /// Set when session fields changed and the store copy is stale.
    pub(crate) session_dirty: AtomicBool,
    pub(crate) is_running: AtomicBool,
    worker_spawned: AtomicBool,
    pub(crate) shutdown_notifier: Notify,
}

impl Client {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Arc<Self> {
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            http_client,
            session: RwLock::new(SessionState::default()),
            throttle: RwLock::new(ThrottleConfig::default()),
            store: RwLock::new(None),
            handlers: DashMap::new(),
            lanes: DashMap::new(),
            response_tx,
            response_rx: Mutex::new(Some(response_rx)),
            staged_values: Mutex::new(BTreeMap::new()),
            game_timer: Mutex::new(GameTimer {
                active: false,
                last: Instant::now(),
            }),
            event_order: AtomicI64::new(1),
            total_time_played: Mutex::new(0.0),
            last_flush: Mutex::new(Instant::now()),
            flush_in_flight: AtomicBool::new(false),
            session_dirty: AtomicBool::new(false),
            is_running: AtomicBool::new(true),
            worker_spawned: AtomicBool::new(false),
            shutdown_notifier: Notify::new(),
        })
    }

    /// Client wired to the default blocking HTTP transport.
    pub fn with_default_http() -> Arc<Self> {
        Self::new(Arc::new(UreqHttpClient::new()))
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Opens (on first call) the local store at `storage_path`, starts the
    /// background worker and issues the connect handshake. Idempotent: a
    /// second call re-issues the handshake against the existing store.
    /// Failures are delivered through `callback`; never synchronously.
    pub async fn connect(
        self: &Arc<Self>,
        storage_path: impl AsRef<Path>,
        game_id: &str,
        uri: &str,
        callback: Option<ResponseCallback>,
    ) {
        self.register_handler(MessageCode::Connect, callback);
        self.ensure_worker();

        if game_id.is_empty() {
            self.push_local_error(MessageCode::Connect, "a game id is required to connect");
            return;
        }

        {
            let mut state = self.session.write().unwrap();
            state.game_id = game_id.to_string();
            if !uri.is_empty() {
                state.connect_uri = uri.trim_end_matches('/').to_string();
            }
        }

        let already_open = self.store.read().unwrap().is_some();
        if !already_open {
            let store = match FileStore::open(storage_path.as_ref()).await {
                Ok(store) => Arc::new(store) as Arc<dyn SdkStore>,
                Err(e) => {
                    warn!(
                        target: "Store/File",
                        "Could not open store at {:?}, falling back to memory: {e}",
                        storage_path.as_ref()
                    );
                    Arc::new(MemoryStore::new())
                }
            };
            self.adopt_store(store).await;
        }

        self.enqueue_call(
            ApiCall::get(MessageCode::Connect, config::API_CONNECT)
                .with_follow_up(FollowUp::ConnectHandshake),
        );
    }

    /// Installs the durable store and loads the state it remembers: the
    /// installation's device id, plus the cookie and counters cached for the
    /// effective device. Events recorded before connect (held in a scratch
    /// in-memory store) are carried over.
    async fn adopt_store(&self, store: Arc<dyn SdkStore>) {
        let base = match store.base_device_id().await {
            Ok(Some(id)) => id,
            _ => {
                let mut bytes = [0u8; 16];
                rand::rng().fill_bytes(&mut bytes);
                let id = hex::encode(bytes);
                if let Err(e) = store.set_base_device_id(&id).await {
                    warn!(target: "Store", "Could not persist the device id: {e}");
                }
                info!(target: "Client", "Generated device id {id}");
                id
            }
        };

        let device_id = {
            let mut state = self.session.write().unwrap();
            state.base_device_id = base;
            let handle = state.player_handle.clone();
            let device_id = state.device_id_for_handle(&handle);
            state.device_id = device_id.clone();
            device_id
        };

        let record = store
            .load_session(&device_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        self.session.write().unwrap().cookie = record.cookie.clone();
        self.event_order
            .store(record.game_session_event_order, Ordering::SeqCst);
        *self.total_time_played.lock().unwrap() = record.total_time_played;

        let previous = self.store.write().unwrap().replace(store.clone());
        if let Some(previous) = previous {
            let buffered = previous.peek_events(usize::MAX).await;
            for event in &buffered {
                if let Err(e) = store.append_event(event).await {
                    warn!(target: "Store", "Could not carry over a buffered event: {e}");
                }
            }
        }
    }

    fn ensure_worker(self: &Arc<Self>) {
        if self.worker_spawned.swap(true, Ordering::AcqRel) {
            return;
        }
        let rx = self.response_rx.lock().unwrap().take();
        if let Some(rx) = rx {
            tokio::spawn(Arc::clone(self).run_worker(rx));
        }
    }

    /// The polling loop: dispatch completed responses to their handlers, run
    /// a telemetry send pass, persist dirty session state, sleep.
    async fn run_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ResponseEnvelope>) {
        debug!(target: "Client/Poll", "Background worker started");
        loop {
            if !self.is_running.load(Ordering::Acquire) {
                break;
            }
            while let Ok(envelope) = rx.try_recv() {
                if !self.is_running.load(Ordering::Acquire) {
                    break;
                }
                self.deliver(envelope);
            }
            self.telemetry_pass().await;
            self.persist_session_if_dirty().await;
            tokio::select! {
                _ = sleep(POLL_INTERVAL) => {}
                _ = self.shutdown_notifier.notified() => break,
            }
        }
        debug!(target: "Client/Poll", "Background worker stopped");
    }

    /// Stops the background worker and dispatch lanes after a best-effort
    /// flush of queued telemetry. Idempotent, and safe to call even when
    /// `connect` never ran. Once this returns, no handler will be invoked
    /// and no new network activity will start.
    pub async fn shutdown(&self) {
        if !self.is_running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(target: "Client", "Shutting down");
        self.shutdown_notifier.notify_waiters();
        self.final_flush().await;
        self.persist_session_record().await;
    }

    /// Last chance to get queued telemetry off the device. Runs inline; the
    /// lanes are already stopping.
    async fn final_flush(&self) {
        if self.flush_in_flight.load(Ordering::Acquire) {
            return;
        }
        if !self.session.read().unwrap().connected {
            return;
        }
        let store = self.store.read().unwrap().clone();
        let Some(store) = store else { return };
        let events = store.peek_events(usize::MAX).await;
        if events.is_empty() {
            return;
        }
        let session_id = self
            .session
            .read()
            .unwrap()
            .game_session_id
            .clone()
            .unwrap_or_default();
        let body = encode_batch(&events, &session_id);
        let call = ApiCall::post_json(MessageCode::Event, config::API_POST_EVENTS, body);
        match self.execute_http(&call).await {
            Ok(response) if response.status_code < 400 => {
                if let Err(e) = store.remove_events(events.len()).await {
                    warn!(target: "Telemetry", "Could not compact the event queue: {e}");
                }
                debug!(target: "Telemetry", "Final flush sent {} events", events.len());
            }
            _ => {
                debug!(target: "Telemetry", "Final flush failed; events remain queued");
            }
        }
    }

    // ------------------------------------------------------------------
    // Authentication and enrollment
    // ------------------------------------------------------------------

    /// Authenticates against the named provider (default provider when
    /// `auth_provider` is `None`). On success the session's user id is
    /// updated and a device update is chained automatically.
    pub fn login(
        self: &Arc<Self>,
        username: &str,
        password: &str,
        auth_provider: Option<&str>,
        callback: Option<ResponseCallback>,
    ) {
        let provider = auth_provider.unwrap_or(config::DEFAULT_AUTH_PROVIDER);
        let path = format!("{}/{}", config::API_POST_LOGIN, provider);
        self.issue_request(
            ApiCall::post_form(
                MessageCode::Login,
                &path,
                vec![
                    ("username", username.to_string()),
                    ("password", password.to_string()),
                ],
            )
            .with_follow_up(FollowUp::Login),
            callback,
        );
    }

    pub fn logout(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::post_form(MessageCode::Logout, config::API_POST_LOGOUT, Vec::new()),
            callback,
        );
    }

    pub fn register_student(
        self: &Arc<Self>,
        username: &str,
        password: &str,
        first_name: &str,
        last_initial: &str,
        callback: Option<ResponseCallback>,
    ) {
        self.issue_request(
            ApiCall::post_form(
                MessageCode::Register,
                config::API_POST_REGISTER,
                vec![
                    ("systemRole", "student".to_string()),
                    ("username", username.to_string()),
                    ("firstName", first_name.to_string()),
                    ("lastName", last_initial.to_string()),
                    ("password", password.to_string()),
                ],
            )
            .with_follow_up(FollowUp::Register),
            callback,
        );
    }

    pub fn register_instructor(
        self: &Arc<Self>,
        name: &str,
        email: &str,
        password: &str,
        newsletter: bool,
        callback: Option<ResponseCallback>,
    ) {
        let (first_name, last_name) = name.split_once(' ').unwrap_or((name, ""));
        self.issue_request(
            ApiCall::post_form(
                MessageCode::Register,
                config::API_POST_REGISTER,
                vec![
                    ("systemRole", "instructor".to_string()),
                    ("email", email.to_string()),
                    ("firstName", first_name.to_string()),
                    ("lastName", last_name.to_string()),
                    ("password", password.to_string()),
                    ("newsletter", newsletter.to_string()),
                ],
            )
            .with_follow_up(FollowUp::Register),
            callback,
        );
    }

    pub fn auth_status(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::get(MessageCode::AuthStatus, config::API_GET_AUTH_STATUS),
            callback,
        );
    }

    pub fn get_user_info(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::get(MessageCode::GetUserInfo, config::API_GET_USER_PROFILE)
                .with_follow_up(FollowUp::GetUserInfo),
            callback,
        );
    }

    pub fn device_update(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        let (device_id, game_id) = {
            let state = self.session.read().unwrap();
            (state.device_id.clone(), state.game_id.clone())
        };
        self.issue_request(
            ApiCall::post_form(
                MessageCode::DeviceUpdate,
                config::API_POST_DEVICE_UPDATE,
                vec![("deviceId", device_id), ("gameId", game_id)],
            ),
            callback,
        );
    }

    pub fn enroll(self: &Arc<Self>, course_code: &str, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::post_form(
                MessageCode::Enroll,
                config::API_POST_ENROLL,
                vec![("courseCode", course_code.to_string())],
            ),
            callback,
        );
    }

    pub fn unenroll(self: &Arc<Self>, course_id: &str, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::post_form(
                MessageCode::Unenroll,
                config::API_POST_UNENROLL,
                vec![("courseId", course_id.to_string())],
            ),
            callback,
        );
    }

    pub fn get_courses(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::get(MessageCode::GetCourses, config::API_GET_COURSES),
            callback,
        );
    }

    // ------------------------------------------------------------------
    // Game sessions
    // ------------------------------------------------------------------

    /// Opens a game session. Event ordinals restart at 1 and a
    /// `Game_start_session` telemetry event is recorded.
    pub async fn start_session(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        let (device_id, game_id, game_level) = {
            let state = self.session.read().unwrap();
            (
                state.device_id.clone(),
                state.game_id.clone(),
                state.game_level.clone(),
            )
        };
        if device_id.is_empty() {
            self.register_handler(MessageCode::StartSession, callback);
            self.ensure_worker();
            self.push_local_error(
                MessageCode::StartSession,
                "no device id; connect before starting a session",
            );
            return;
        }

        self.event_order.store(1, Ordering::SeqCst);
        self.session_dirty.store(true, Ordering::Release);

        let mut fields = vec![("deviceId", device_id)];
        if !game_level.is_empty() {
            fields.push(("gameLevel", game_level));
        }
        fields.push(("gameId", game_id));
        fields.push(("timestamp", chrono::Utc::now().timestamp().to_string()));

        self.issue_request(
            ApiCall::post_form(MessageCode::StartSession, config::API_POST_SESSION_START, fields)
                .with_follow_up(FollowUp::StartSession),
            callback,
        );
        self.save_telem_event("Game_start_session").await;
    }

    /// Closes the current game session, flushing queued telemetry first so
    /// the session's events reach the server before it is closed out.
    pub async fn end_session(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        self.save_telem_event("Game_end_session").await;
        self.force_flush_telemetry().await;

        let session_id = {
            let state = self.session.read().unwrap();
            state.game_session_id.clone().unwrap_or_default()
        };
        self.issue_request(
            ApiCall::post_form(
                MessageCode::EndSession,
                config::API_POST_SESSION_END,
                vec![
                    ("gameSessionId", session_id),
                    ("timestamp", chrono::Utc::now().timestamp().to_string()),
                ],
            )
            .with_follow_up(FollowUp::EndSession),
            callback,
        );
    }

    // ------------------------------------------------------------------
    // Game saves
    // ------------------------------------------------------------------

    pub fn save_game(self: &Arc<Self>, game_data: &str, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::post_json(
                MessageCode::GameSave,
                config::API_SAVEGAME,
                game_data.to_string(),
            ),
            callback,
        );
    }

    pub fn get_save_game(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::get(MessageCode::GetGameSave, config::API_SAVEGAME),
            callback,
        );
    }

    pub fn delete_save_game(self: &Arc<Self>, callback: Option<ResponseCallback>) {
        self.issue_request(
            ApiCall::delete(MessageCode::DeleteGameSave, config::API_SAVEGAME),
            callback,
        );
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    /// Stages one typed field for the next event. Re-using a key replaces
    /// the staged value.
    pub fn add_telem_event_value(&self, key: &str, value: impl Into<TelemetryValue>) {
        self.staged_values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.into());
    }

    /// Discards all staged fields without recording an event.
    pub fn clear_telem_event_values(&self) {
        self.staged_values.lock().unwrap().clear();
    }

    /// Finalizes the staged fields into an event named `name` and appends it
    /// to the durable queue. The staging area is left empty.
    pub async fn save_telem_event(&self, name: &str) {
        let data = std::mem::take(&mut *self.staged_values.lock().unwrap());
        let total_time_played = *self.total_time_played.lock().unwrap();
        let event = {
            let state = self.session.read().unwrap();
            TelemetryEvent {
                name: name.to_string(),
                client_timestamp: chrono::Utc::now().timestamp(),
                game_id: state.game_id.clone(),
                event_order: self.event_order.fetch_add(1, Ordering::SeqCst),
                device_id: (!state.device_id.is_empty()).then(|| state.device_id.clone()),
                client_version: (!state.client_version.is_empty())
                    .then(|| state.client_version.clone()),
                game_level: (!state.game_level.is_empty()).then(|| state.game_level.clone()),
                total_time_played,
                data,
            }
        };
        self.session_dirty.store(true, Ordering::Release);

        // Events recorded before connect land in a scratch in-memory store
        // and are carried over once the durable store opens.
        let store = {
            let mut slot = self.store.write().unwrap();
            slot.get_or_insert_with(|| Arc::new(MemoryStore::new()) as Arc<dyn SdkStore>)
                .clone()
        };
        if let Err(e) = store.append_event(&event).await {
            warn!(target: "Telemetry", "Could not queue event {name:?}: {e}");
        }
    }

    /// Records an achievement directly, bypassing the staging area. The
    /// completion is fire-and-forget.
    pub fn save_achievement(self: &Arc<Self>, item: &str, group: &str, sub_group: &str) {
        let body = serde_json::json!({
            "item": item,
            "group": group,
            "subGroup": sub_group,
        })
        .to_string();
        self.enqueue_call(
            ApiCall::post_json(MessageCode::Event, config::API_POST_ACHIEVEMENT, body)
                .into_internal(),
        );
    }

    /// Starts the game timer: telemetry flushes resume and play time starts
    /// accruing.
    pub fn start_game_timer(&self) {
        let mut timer = self.game_timer.lock().unwrap();
        if !timer.active {
            timer.active = true;
            timer.last = Instant::now();
        }
    }

    /// Stops the game timer, suspending periodic telemetry flushes.
    pub fn stop_game_timer(&self) {
        self.game_timer.lock().unwrap().active = false;
    }

    /// One send pass, run by the worker every poll cycle: accrue play time,
    /// then upload a batch when the throttle thresholds allow it.
    pub(crate) async fn telemetry_pass(self: &Arc<Self>) {
        let timer_active = {
            let mut timer = self.game_timer.lock().unwrap();
            if timer.active {
                let delta = timer.last.elapsed().as_secs_f64();
                timer.last = Instant::now();
                *self.total_time_played.lock().unwrap() += delta;
            }
            timer.active
        };
        if !timer_active {
            return;
        }
        if self.flush_in_flight.load(Ordering::Acquire) {
            return;
        }
        if !self.session.read().unwrap().connected {
            return;
        }
        let store = self.store.read().unwrap().clone();
        let Some(store) = store else { return };
        let queued = store.pending_events().await;
        if queued == 0 {
            return;
        }

        let throttle = *self.throttle.read().unwrap();
        let elapsed = self.last_flush.lock().unwrap().elapsed();
        let interval_due =
            elapsed.as_secs() >= throttle.events_period_secs && queued >= throttle.events_min_size;
        if interval_due || queued >= throttle.events_max_size {
            self.flush_batch(&store, throttle.events_max_size).await;
        }
    }

    /// Sends all queued events now, ignoring the throttle thresholds. Used
    /// before end-session and at shutdown; requires connected state.
    pub async fn force_flush_telemetry(self: &Arc<Self>) {
        if self.flush_in_flight.load(Ordering::Acquire) {
            return;
        }
        if !self.session.read().unwrap().connected {
            return;
        }
        let store = self.store.read().unwrap().clone();
        let Some(store) = store else { return };
        let pending = store.pending_events().await;
        if pending > 0 {
            self.flush_batch(&store, pending).await;
        }
    }

    async fn flush_batch(self: &Arc<Self>, store: &Arc<dyn SdkStore>, max: usize) {
        let events = store.peek_events(max).await;
        if events.is_empty() {
            return;
        }
        let session_id = self
            .session
            .read()
            .unwrap()
            .game_session_id
            .clone()
            .unwrap_or_default();
        let body = encode_batch(&events, &session_id);

        self.flush_in_flight.store(true, Ordering::Release);
        *self.last_flush.lock().unwrap() = Instant::now();
        debug!(target: "Telemetry", "Sending batch of {} events", events.len());
        self.enqueue_call(
            ApiCall::post_json(MessageCode::Event, config::API_POST_EVENTS, body)
                .with_follow_up(FollowUp::TelemetryBatch {
                    count: events.len(),
                })
                .into_internal(),
        );
    }

    // ------------------------------------------------------------------
    // Session persistence
    // ------------------------------------------------------------------

    pub(crate) async fn persist_session_record(&self) {
        let store = self.store.read().unwrap().clone();
        let Some(store) = store else { return };
        let (device_id, cookie) = {
            let state = self.session.read().unwrap();
            (state.device_id.clone(), state.cookie.clone())
        };
        if device_id.is_empty() {
            return;
        }
        let record = SessionRecord {
            cookie,
            game_session_event_order: self.event_order.load(Ordering::SeqCst),
            total_time_played: *self.total_time_played.lock().unwrap(),
        };
        if let Err(e) = store.save_session(&device_id, &record).await {
            warn!(target: "Store", "Could not persist the session record: {e}");
        }
    }

    async fn persist_session_if_dirty(&self) {
        if self.session_dirty.swap(false, Ordering::AcqRel) {
            self.persist_session_record().await;
        }
    }

    // ------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------

    pub fn set_name(&self, name: &str) {
        self.session.write().unwrap().client_name = name.to_string();
    }

    pub fn set_version(&self, version: &str) {
        self.session.write().unwrap().client_version = version.to_string();
    }

    pub fn set_game_level(&self, game_level: &str) {
        self.session.write().unwrap().game_level = game_level.to_string();
    }

    pub fn set_user_id(&self, user_id: i32) {
        self.session.write().unwrap().user_id = user_id;
    }

    pub fn set_cookie(&self, cookie: &str) {
        self.session.write().unwrap().cookie = cookie.to_string();
        self.session_dirty.store(true, Ordering::Release);
    }

    /// Switches the effective device id to `<handle>_<base id>` and loads
    /// the cookie and counters cached for that handle.
    pub async fn set_player_handle(&self, handle: &str) {
        let device_id = self.session.read().unwrap().device_id_for_handle(handle);
        let store = self.store.read().unwrap().clone();
        let record = match &store {
            Some(store) => store
                .load_session(&device_id)
                .await
                .ok()
                .flatten()
                .unwrap_or_default(),
            None => SessionRecord::default(),
        };

        // Device id and cookie must switch together; the background persist
        // pass reads both under the same lock.
        {
            let mut state = self.session.write().unwrap();
            state.player_handle = handle.to_string();
            state.device_id = device_id.clone();
            state.cookie = record.cookie.clone();
        }
        self.event_order
            .store(record.game_session_event_order, Ordering::SeqCst);
        *self.total_time_played.lock().unwrap() = record.total_time_played;
        if store.is_some() {
            self.session_dirty.store(true, Ordering::Release);
        }
        debug!(target: "Client", "Switched device id to {device_id}");
    }

    /// Forgets the session record cached for a handle.
    pub async fn remove_player_handle(&self, handle: &str) {
        let device_id = self.session.read().unwrap().device_id_for_handle(handle);
        let store = self.store.read().unwrap().clone();
        if let Some(store) = store {
            if let Err(e) = store.remove_session(&device_id).await {
                warn!(target: "Store", "Could not remove session record for {device_id}: {e}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    pub fn get_connect_uri(&self) -> String {
        self.session.read().unwrap().connect_uri.clone()
    }

    pub fn get_user_id(&self) -> i32 {
        self.session.read().unwrap().user_id
    }

    pub fn get_game_id(&self) -> String {
        self.session.read().unwrap().game_id.clone()
    }

    pub fn get_session_id(&self) -> String {
        self.session
            .read()
            .unwrap()
            .game_session_id
            .clone()
            .unwrap_or_default()
    }

    /// Cached session cookie. With `full_cookie` false, only the bare
    /// session token (the `connect.sid` value) is returned.
    pub fn get_cookie(&self, full_cookie: bool) -> String {
        let cookie = self.session.read().unwrap().cookie.clone();
        if full_cookie {
            cookie
        } else {
            extract_session_token(&cookie).to_string()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.read().unwrap().connected
    }

    pub fn user_info(&self) -> UserInfo {
        self.session.read().unwrap().user_info.clone()
    }

    pub fn total_time_played(&self) -> f64 {
        *self.total_time_played.lock().unwrap()
    }
}
