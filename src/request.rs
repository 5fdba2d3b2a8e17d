//! Message categories, per-category dispatch lanes and pending-handler
//! queues.
//!
//! Every outbound call belongs to exactly one [`MessageCode`] category. Calls
//! within a category are executed on a single ordered lane, so completions
//! enter the response queue in submission order no matter how long each
//! network exchange takes; different categories run concurrently and have no
//! ordering relationship. The background worker pops one pending handler per
//! completion, which keeps the Nth request of a category paired with the Nth
//! response.

use crate::client::Client;
use crate::config::{API_CONNECT, API_GET_CONFIG, GAME_ID_TAG};
use crate::http::{HttpRequest, HttpResponse};
use crate::session::UserInfo;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

/// Payload delivered when the request never produced a server response.
pub const TRANSPORT_ERROR_PAYLOAD: &str = r#"{"status":"error","error":"request timed out"}"#;

/// Category tag attached to every server completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    Connect,
    DeviceUpdate,
    AuthStatus,
    Register,
    Login,
    Logout,
    Enroll,
    Unenroll,
    GetCourses,
    StartSession,
    EndSession,
    GameSave,
    GetGameSave,
    DeleteGameSave,
    GetUserInfo,
    Event,
    Error,
}

impl MessageCode {
    /// Stable key used for request cancellation.
    pub fn key(&self) -> &'static str {
        match self {
            MessageCode::Connect => "connect",
            MessageCode::DeviceUpdate => "device_update",
            MessageCode::AuthStatus => "auth_status",
            MessageCode::Register => "register",
            MessageCode::Login => "login",
            MessageCode::Logout => "logout",
            MessageCode::Enroll => "enroll",
            MessageCode::Unenroll => "unenroll",
            MessageCode::GetCourses => "get_courses",
            MessageCode::StartSession => "start_session",
            MessageCode::EndSession => "end_session",
            MessageCode::GameSave => "game_save",
            MessageCode::GetGameSave => "get_game_save",
            MessageCode::DeleteGameSave => "delete_game_save",
            MessageCode::GetUserInfo => "get_user_info",
            MessageCode::Event => "event",
            MessageCode::Error => "error",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        const ALL: [MessageCode; 17] = [
            MessageCode::Connect,
            MessageCode::DeviceUpdate,
            MessageCode::AuthStatus,
            MessageCode::Register,
            MessageCode::Login,
            MessageCode::Logout,
            MessageCode::Enroll,
            MessageCode::Unenroll,
            MessageCode::GetCourses,
            MessageCode::StartSession,
            MessageCode::EndSession,
            MessageCode::GameSave,
            MessageCode::GetGameSave,
            MessageCode::DeleteGameSave,
            MessageCode::GetUserInfo,
            MessageCode::Event,
            MessageCode::Error,
        ];
        ALL.into_iter().find(|code| code.key() == key)
    }
}

/// Success or failure of a completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

/// A completed server exchange, as delivered to caller handlers.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub code: MessageCode,
    pub status: Status,
    /// Response body, normally JSON text.
    pub payload: String,
}

impl ResponseEnvelope {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Completion handler for one asynchronous call. Handlers run on the
/// background worker; callers needing thread affinity must marshal results
/// back themselves.
pub type ResponseCallback = Box<dyn FnOnce(ResponseEnvelope) + Send + 'static>;

pub(crate) struct PendingHandler {
    pub cancelled: bool,
    // Wrapped in a Mutex so the handler queue (stored in a `DashMap`, which
    // requires its values be `Sync`) stays `Sync` even though the boxed
    // `FnOnce` callback is only `Send`. The callback is still consumed by
    // value exactly once when its response is delivered.
    pub callback: Option<std::sync::Mutex<ResponseCallback>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RequestBody {
    None,
    Form(Vec<(&'static str, String)>),
    Json(String),
}

/// Session/state side effects to run once a call completes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FollowUp {
    None,
    /// Two-legged connect: gateway lookup, then per-game config fetch.
    ConnectHandshake,
    /// Parse the user id and chain an automatic device update.
    Login,
    /// Chain an automatic device update.
    Register,
    /// Record the game session id issued by the server.
    StartSession,
    /// Clear the active game session id.
    EndSession,
    /// Cache the returned profile fields.
    GetUserInfo,
    /// Drop `count` events from the head of the durable queue.
    TelemetryBatch { count: usize },
}

pub(crate) struct ApiCall {
    pub code: MessageCode,
    pub method: &'static str,
    pub path: String,
    pub body: RequestBody,
    pub follow_up: FollowUp,
    /// Internally chained calls have no waiting caller; their completions
    /// bypass the response queue entirely.
    pub internal: bool,
}

impl ApiCall {
    pub(crate) fn get(code: MessageCode, path: &str) -> Self {
        Self {
            code,
            method: "GET",
            path: path.to_string(),
            body: RequestBody::None,
            follow_up: FollowUp::None,
            internal: false,
        }
    }

    pub(crate) fn post_form(
        code: MessageCode,
        path: &str,
        fields: Vec<(&'static str, String)>,
    ) -> Self {
        Self {
            code,
            method: "POST",
            path: path.to_string(),
            body: RequestBody::Form(fields),
            follow_up: FollowUp::None,
            internal: false,
        }
    }

    pub(crate) fn post_json(code: MessageCode, path: &str, body: String) -> Self {
        Self {
            code,
            method: "POST",
            path: path.to_string(),
            body: RequestBody::Json(body),
            follow_up: FollowUp::None,
            internal: false,
        }
    }

    pub(crate) fn delete(code: MessageCode, path: &str) -> Self {
        Self {
            code,
            method: "DELETE",
            path: path.to_string(),
            body: RequestBody::None,
            follow_up: FollowUp::None,
            internal: false,
        }
    }

    pub(crate) fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = follow_up;
        self
    }

    pub(crate) fn into_internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

fn classify_response(status_code: u16, payload: &str) -> Status {
    if status_code >= 400 {
        return Status::Error;
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(payload) {
        if map.get("error").is_some_and(|v| v.is_string()) {
            return Status::Error;
        }
    }
    Status::Ok
}

fn encode_form(fields: &[(&'static str, String)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

impl Client {
    /// Queues a pending handler for `code`. `None` behaves as a no-op handler
    /// but still occupies a slot so request/response pairing stays aligned.
    pub(crate) fn register_handler(&self, code: MessageCode, callback: Option<ResponseCallback>) {
        self.handlers.entry(code).or_default().push_back(PendingHandler {
            cancelled: false,
            callback: callback.map(std::sync::Mutex::new),
        });
    }

    /// Marks the oldest live pending handler for `key` as cancelled. Its
    /// response is consumed silently when it arrives; the handler never runs.
    /// Unknown keys and categories with nothing pending are a no-op.
    pub fn cancel_request(&self, key: &str) {
        let Some(code) = MessageCode::from_key(key) else {
            debug!(target: "Client/Dispatch", "cancel_request: unknown key {key:?}");
            return;
        };
        let Some(mut queue) = self.handlers.get_mut(&code) else {
            return;
        };
        if let Some(handler) = queue.iter_mut().find(|h| !h.cancelled) {
            handler.cancelled = true;
            handler.callback = None;
            debug!(target: "Client/Dispatch", "Cancelled pending {key} request");
        }
    }

    /// Registers a handler and queues the call on its category lane. The
    /// handler-queue entry stays locked until the call is on the lane, so
    /// concurrent callers cannot misalign the request/response pairing.
    pub(crate) fn issue_request(
        self: &Arc<Self>,
        call: ApiCall,
        callback: Option<ResponseCallback>,
    ) {
        let mut queue = self.handlers.entry(call.code).or_default();
        queue.push_back(PendingHandler {
            cancelled: false,
            callback: callback.map(std::sync::Mutex::new),
        });
        self.enqueue_call(call);
    }

    pub(crate) fn enqueue_call(self: &Arc<Self>, call: ApiCall) {
        if !self.is_running.load(Ordering::Acquire) {
            debug!(
                target: "Client/Dispatch",
                "Dropping {:?} call issued after shutdown", call.code
            );
            return;
        }
        let sender = self
            .lanes
            .entry(call.code)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(Arc::clone(self).run_lane(call.code, rx));
                tx
            })
            .clone();
        if sender.send(call).is_err() {
            warn!(target: "Client/Dispatch", "Dispatch lane is gone; call dropped");
        }
    }

    /// Serialized executor for one category. Runs until shutdown or until the
    /// owning client is dropped.
    pub(crate) async fn run_lane(
        self: Arc<Self>,
        code: MessageCode,
        mut rx: mpsc::UnboundedReceiver<ApiCall>,
    ) {
        loop {
            if !self.is_running.load(Ordering::Acquire) {
                return;
            }
            tokio::select! {
                maybe_call = rx.recv() => {
                    let Some(call) = maybe_call else { return };
                    if !self.is_running.load(Ordering::Acquire) {
                        return;
                    }
                    let internal = call.internal;
                    let envelope = self.execute_call(call).await;
                    if !internal {
                        let _ = self.response_tx.send(envelope);
                    }
                }
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Dispatch", "Shutdown signaled, {:?} lane exiting", code);
                    return;
                }
            }
        }
    }

    /// Pushes a locally generated failure through the response queue so the
    /// caller's handler still fires; nothing in the public API fails
    /// synchronously.
    pub(crate) fn push_local_error(&self, code: MessageCode, error: &str) {
        let payload = serde_json::json!({ "status": "error", "error": error }).to_string();
        let _ = self.response_tx.send(ResponseEnvelope {
            code,
            status: Status::Error,
            payload,
        });
    }

    /// Delivers one completed response to the head of its category's handler
    /// queue. Runs on the background worker.
    pub(crate) fn deliver(&self, envelope: ResponseEnvelope) {
        let handler = match self.handlers.get_mut(&envelope.code) {
            Some(mut queue) => queue.pop_front(),
            None => None,
        };
        match handler {
            None => {
                // No waiting caller for this category; dropped by design.
                debug!(
                    target: "Client/Dispatch",
                    "No pending handler for {:?} response, dropping", envelope.code
                );
            }
            Some(handler) if handler.cancelled => {
                debug!(
                    target: "Client/Dispatch",
                    "{:?} response ignored because its request was cancelled", envelope.code
                );
            }
            Some(handler) => {
                if let Some(callback) = handler.callback {
                    let callback = callback.into_inner().unwrap_or_else(|e| e.into_inner());
                    callback(envelope);
                }
            }
        }
    }

    pub(crate) async fn execute_http(&self, call: &ApiCall) -> anyhow::Result<HttpResponse> {
        let (url, cookie, user_agent) = {
            let state = self.session.read().unwrap();
            let path = call.path.replace(GAME_ID_TAG, &state.game_id);
            (
                format!("{}{}", state.connect_uri.trim_end_matches('/'), path),
                state.cookie.clone(),
                state.user_agent(),
            )
        };

        let mut request = match call.method {
            "POST" => HttpRequest::post(url),
            "DELETE" => HttpRequest::delete(url),
            _ => HttpRequest::get(url),
        }
        .with_header("User-Agent", user_agent)
        .with_header("Accept", "*/*");

        if !cookie.is_empty() {
            request = request.with_header("Cookie", cookie);
        }

        request = match &call.body {
            RequestBody::None => request,
            RequestBody::Form(fields) => request
                .with_header("Content-Type", "application/x-www-form-urlencoded")
                .with_body(encode_form(fields).into_bytes()),
            RequestBody::Json(json) => request
                .with_header("Content-Type", "application/json")
                .with_body(json.clone().into_bytes()),
        };

        self.http_client.execute(request).await
    }

    fn capture_cookie(&self, response: &HttpResponse) {
        if let Some(cookie) = response.header("set-cookie") {
            debug!(target: "Client/Dispatch", "Updating session cookie from response");
            self.session.write().unwrap().cookie = cookie.to_string();
            self.session_dirty.store(true, Ordering::Release);
        }
    }

    pub(crate) async fn execute_call(self: &Arc<Self>, call: ApiCall) -> ResponseEnvelope {
        if call.follow_up == FollowUp::ConnectHandshake {
            return self.execute_connect_handshake().await;
        }

        match self.execute_http(&call).await {
            Ok(response) => {
                self.capture_cookie(&response);
                let payload = response.body_string();
                let status = match classify_response(response.status_code, &payload) {
                    Status::Ok => self.apply_follow_up(&call.follow_up, &payload).await,
                    Status::Error => {
                        self.abort_follow_up(&call.follow_up);
                        Status::Error
                    }
                };
                ResponseEnvelope {
                    code: call.code,
                    status,
                    payload,
                }
            }
            Err(e) => {
                warn!(
                    target: "Client/Dispatch",
                    "{:?} request failed before a response arrived: {e}", call.code
                );
                self.abort_follow_up(&call.follow_up);
                ResponseEnvelope {
                    code: call.code,
                    status: Status::Error,
                    payload: TRANSPORT_ERROR_PAYLOAD.to_string(),
                }
            }
        }
    }

    /// Connect is a chain of two exchanges delivering a single completion:
    /// the gateway may redirect us to a different server, then the per-game
    /// config supplies throttle overrides and marks the client connected.
    async fn execute_connect_handshake(self: &Arc<Self>) -> ResponseEnvelope {
        let gateway = ApiCall::get(MessageCode::Connect, API_CONNECT);
        match self.execute_http(&gateway).await {
            Ok(response) if response.status_code < 400 => {
                self.capture_cookie(&response);
                let uri = response.body_string();
                let uri = uri.trim().trim_end_matches('/').to_string();
                if uri.starts_with("http://") || uri.starts_with("https://") {
                    debug!(target: "Client/Dispatch", "Gateway redirected connect uri to {uri}");
                    self.session.write().unwrap().connect_uri = uri;
                }
            }
            Ok(_) => {}
            // The configured uri may still be serviceable; try the config
            // fetch against it regardless.
            Err(e) => {
                warn!(target: "Client/Dispatch", "Gateway lookup failed: {e}");
            }
        }

        let config = ApiCall::get(MessageCode::Connect, API_GET_CONFIG);
        match self.execute_http(&config).await {
            Ok(response) => {
                self.capture_cookie(&response);
                let payload = response.body_string();
                let status = classify_response(response.status_code, &payload);
                if status == Status::Ok {
                    if let Ok(body) = serde_json::from_str::<serde_json::Value>(&payload) {
                        self.throttle.write().unwrap().apply_server_overrides(&body);
                    }
                    self.session.write().unwrap().connected = true;
                } else {
                    self.session.write().unwrap().connected = false;
                }
                ResponseEnvelope {
                    code: MessageCode::Connect,
                    status,
                    payload,
                }
            }
            Err(e) => {
                warn!(target: "Client/Dispatch", "Config fetch failed: {e}");
                self.session.write().unwrap().connected = false;
                ResponseEnvelope {
                    code: MessageCode::Connect,
                    status: Status::Error,
                    payload: TRANSPORT_ERROR_PAYLOAD.to_string(),
                }
            }
        }
    }

    /// Post-completion side effects for a successful exchange. May downgrade
    /// the status when the body is missing something the session needs.
    async fn apply_follow_up(self: &Arc<Self>, follow_up: &FollowUp, payload: &str) -> Status {
        match follow_up {
            FollowUp::None | FollowUp::ConnectHandshake => Status::Ok,
            FollowUp::Login => {
                match serde_json::from_str::<serde_json::Value>(payload)
                    .ok()
                    .and_then(|body| body.get("id").and_then(|id| id.as_i64()))
                {
                    Some(user_id) => {
                        self.session.write().unwrap().user_id = user_id as i32;
                    }
                    None => {
                        warn!(
                            target: "Client/Dispatch",
                            "Login response carried no user id; session start will omit it"
                        );
                    }
                }
                self.chain_device_update();
                Status::Ok
            }
            FollowUp::Register => {
                self.chain_device_update();
                Status::Ok
            }
            FollowUp::StartSession => {
                match serde_json::from_str::<serde_json::Value>(payload)
                    .ok()
                    .and_then(|body| {
                        body.get("gameSessionId")
                            .and_then(|id| id.as_str().map(String::from))
                    }) {
                    Some(session_id) => {
                        debug!(target: "Client/Dispatch", "Game session opened: {session_id}");
                        self.session.write().unwrap().game_session_id = Some(session_id);
                        Status::Ok
                    }
                    None => {
                        warn!(
                            target: "Client/Dispatch",
                            "Start-session response is missing the gameSessionId"
                        );
                        Status::Error
                    }
                }
            }
            FollowUp::EndSession => {
                self.session.write().unwrap().game_session_id = None;
                Status::Ok
            }
            FollowUp::GetUserInfo => {
                if let Ok(body) = serde_json::from_str::<serde_json::Value>(payload) {
                    let field = |name: &str| {
                        body.get(name)
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string()
                    };
                    self.session.write().unwrap().user_info = UserInfo {
                        username: field("username"),
                        first_name: field("firstName"),
                        last_initial: field("lastName"),
                        email: field("email"),
                    };
                }
                Status::Ok
            }
            FollowUp::TelemetryBatch { count } => {
                let store = self.store.read().unwrap().clone();
                if let Some(store) = store {
                    if let Err(e) = store.remove_events(*count).await {
                        warn!(target: "Telemetry", "Could not compact the event queue: {e}");
                    }
                }
                self.persist_session_record().await;
                self.flush_in_flight.store(false, Ordering::Release);
                debug!(target: "Telemetry", "Uploaded batch of {count} events");
                Status::Ok
            }
        }
    }

    /// Cleanup for calls that never reached a successful completion.
    fn abort_follow_up(&self, follow_up: &FollowUp) {
        if let FollowUp::TelemetryBatch { count } = follow_up {
            // Queued events stay put and ride along with the next flush.
            debug!(
                target: "Telemetry",
                "Batch of {count} events failed to upload, keeping them queued"
            );
            self.flush_in_flight.store(false, Ordering::Release);
        }
    }

    fn chain_device_update(self: &Arc<Self>) {
        let (device_id, game_id) = {
            let state = self.session.read().unwrap();
            (state.device_id.clone(), state.game_id.clone())
        };
        self.enqueue_call(
            ApiCall::post_form(
                MessageCode::DeviceUpdate,
                crate::config::API_POST_DEVICE_UPDATE,
                vec![("deviceId", device_id), ("gameId", game_id)],
            )
            .into_internal(),
        );
    }
}
