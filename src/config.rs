//! Endpoint table and tunable defaults for the GlassLab services backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server used when `connect` was never given a URI.
pub const DEFAULT_CONNECT_URI: &str = "http://127.0.0.1:8000";

/// How often the background worker wakes up to dispatch responses and attempt
/// a telemetry send pass.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Placeholder in endpoint paths that is replaced with the session's game id.
pub const GAME_ID_TAG: &str = ":gameId";

pub const API_CONNECT: &str = "/sdk/connect";
pub const API_GET_CONFIG: &str = "/api/v2/data/config/:gameId";
pub const API_POST_REGISTER: &str = "/api/v2/auth/user/register";
pub const API_GET_USER_PROFILE: &str = "/api/v2/auth/user/profile";
pub const API_GET_AUTH_STATUS: &str = "/api/v2/auth/login/status";
pub const API_POST_LOGIN: &str = "/api/v2/auth/login";
pub const API_POST_LOGOUT: &str = "/api/v2/auth/logout";
pub const API_POST_ENROLL: &str = "/api/v2/lms/course/enroll";
pub const API_POST_UNENROLL: &str = "/api/v2/lms/course/unenroll";
pub const API_GET_COURSES: &str = "/api/v2/lms/courses";
pub const API_POST_SESSION_START: &str = "/api/v2/data/session/start";
pub const API_POST_SESSION_END: &str = "/api/v2/data/session/end";
pub const API_POST_DEVICE_UPDATE: &str = "/api/v2/data/game/device";
pub const API_SAVEGAME: &str = "/api/v2/data/game/:gameId";
pub const API_POST_ACHIEVEMENT: &str = "/api/v2/data/game/:gameId/achievement";
pub const API_POST_EVENTS: &str = "/api/v2/data/events";

/// Login provider used when the caller does not name one.
pub const DEFAULT_AUTH_PROVIDER: &str = "glasslab";

/// Telemetry upload throttling. The server may override any of these through
/// the connect/config handshake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum number of seconds between batch uploads.
    pub events_period_secs: u64,
    /// Queued events required before the periodic flush bothers sending.
    pub events_min_size: usize,
    /// Upper bound on events sent in a single batch.
    pub events_max_size: usize,
    /// Server-driven verbosity level; carried but not interpreted locally.
    pub events_detail_level: i64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            events_period_secs: 30,
            events_min_size: 5,
            events_max_size: 50,
            events_detail_level: 10,
        }
    }
}

impl ThrottleConfig {
    /// Applies any throttle fields present in a config response body.
    /// Unknown or mistyped fields are left at their current values.
    pub(crate) fn apply_server_overrides(&mut self, body: &serde_json::Value) {
        if let Some(v) = body.get("eventsPeriodSecs").and_then(|v| v.as_u64()) {
            self.events_period_secs = v;
        }
        if let Some(v) = body.get("eventsMinSize").and_then(|v| v.as_u64()) {
            self.events_min_size = v as usize;
        }
        if let Some(v) = body.get("eventsMaxSize").and_then(|v| v.as_u64()) {
            self.events_max_size = v as usize;
        }
        if let Some(v) = body.get("eventsDetailLevel").and_then(|v| v.as_i64()) {
            self.events_detail_level = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_overrides_are_partial() {
        let mut config = ThrottleConfig::default();
        let body: serde_json::Value =
            serde_json::from_str(r#"{"eventsPeriodSecs": 5, "eventsMaxSize": 10}"#).unwrap();
        config.apply_server_overrides(&body);
        assert_eq!(config.events_period_secs, 5);
        assert_eq!(config.events_max_size, 10);
        assert_eq!(config.events_min_size, ThrottleConfig::default().events_min_size);
    }

    #[test]
    fn mistyped_overrides_are_ignored() {
        let mut config = ThrottleConfig::default();
        let body: serde_json::Value =
            serde_json::from_str(r#"{"eventsMinSize": "lots"}"#).unwrap();
        config.apply_server_overrides(&body);
        assert_eq!(config, ThrottleConfig::default());
    }
}
