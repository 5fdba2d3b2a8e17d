//! Connection and authentication state for a single client instance.

use crate::config::{DEFAULT_CONNECT_URI, SDK_VERSION};

/// Marker preceding the bare session token inside the full cookie string.
const SESSION_TOKEN_MARKER: &str = "connect.sid=";

/// Profile fields returned by the user-info endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInfo {
    pub username: String,
    pub first_name: String,
    pub last_initial: String,
    pub email: String,
}

/// Mutable session state shared between the caller-facing API, the dispatch
/// lanes and the background worker. Guarded by a `std::sync::RwLock` on the
/// client; critical sections only copy fields in or out.
#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    pub connect_uri: String,
    pub game_id: String,
    /// Device id as generated for this installation, before any player
    /// handle is applied.
    pub base_device_id: String,
    /// Effective device id: `base_device_id`, or `<handle>_<base_device_id>`
    /// while a player handle is set.
    pub device_id: String,
    pub cookie: String,
    pub game_session_id: Option<String>,
    pub user_id: i32,
    pub player_handle: String,
    pub client_name: String,
    pub client_version: String,
    pub game_level: String,
    pub connected: bool,
    pub user_info: UserInfo,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connect_uri: DEFAULT_CONNECT_URI.to_string(),
            game_id: String::new(),
            base_device_id: String::new(),
            device_id: String::new(),
            cookie: String::new(),
            game_session_id: None,
            user_id: 0,
            player_handle: String::new(),
            client_name: String::new(),
            client_version: String::new(),
            game_level: String::new(),
            connected: false,
            user_info: UserInfo::default(),
        }
    }
}

impl SessionState {
    /// Effective device id for a given player handle.
    pub fn device_id_for_handle(&self, handle: &str) -> String {
        if handle.is_empty() {
            self.base_device_id.clone()
        } else {
            format!("{}_{}", handle, self.base_device_id)
        }
    }

    /// User-Agent header sent with every request. Identifies the SDK build
    /// and, when the host game set them, the client name and version.
    pub fn user_agent(&self) -> String {
        if self.client_name.is_empty() {
            format!("GlassLab SDK v{SDK_VERSION}")
        } else {
            format!(
                "GlassLab SDK v{SDK_VERSION} - Client \"{}\" v{}",
                self.client_name, self.client_version
            )
        }
    }
}

/// Extracts the bare session token from a full cookie string: the substring
/// between `connect.sid=` and the next `;`. Returns an empty string when the
/// marker is absent or the token is not `;`-terminated.
pub(crate) fn extract_session_token(cookie: &str) -> &str {
    let Some(start) = cookie.find(SESSION_TOKEN_MARKER) else {
        return "";
    };
    let rest = &cookie[start + SESSION_TOKEN_MARKER.len()..];
    match rest.find(';') {
        Some(end) => &rest[..end],
        None => "",
    }
}
