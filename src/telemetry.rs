//! Telemetry event model: typed field values, the event envelope, and wire
//! encoding for batch upload.
//!
//! Events are staged field-by-field, finalized under a name, then queued in
//! the durable store until a flush pass uploads them. The game session id is
//! bound at send time, not save time: events are frequently recorded before
//! the start-session response has arrived.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// A strongly typed telemetry field value. The exact width the caller used is
/// preserved through staging, the durable queue and the wire encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TelemetryValue {
    String(String),
    I8(i8),
    I16(i16),
    I32(i32),
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl TelemetryValue {
    /// Plain JSON rendering used in the upload payload.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TelemetryValue::String(v) => json!(v),
            TelemetryValue::I8(v) => json!(v),
            TelemetryValue::I16(v) => json!(v),
            TelemetryValue::I32(v) => json!(v),
            TelemetryValue::U8(v) => json!(v),
            TelemetryValue::U16(v) => json!(v),
            TelemetryValue::U32(v) => json!(v),
            TelemetryValue::F32(v) => json!(v),
            TelemetryValue::F64(v) => json!(v),
            TelemetryValue::Bool(v) => json!(v),
        }
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::String(v.to_string())
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        TelemetryValue::String(v)
    }
}

macro_rules! impl_from_value {
    ($(($ty:ty, $variant:ident)),* $(,)?) => {
        $(
            impl From<$ty> for TelemetryValue {
                fn from(v: $ty) -> Self {
                    TelemetryValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_value! {
    (i8, I8),
    (i16, I16),
    (i32, I32),
    (u8, U8),
    (u16, U16),
    (u32, U32),
    (f32, F32),
    (f64, F64),
    (bool, Bool),
}

/// One finalized telemetry event, as held in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub name: String,
    /// Unix seconds at save time.
    pub client_timestamp: i64,
    pub game_id: String,
    /// Ordinal of this event within its game session, starting at 1.
    pub event_order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_level: Option<String>,
    pub total_time_played: f64,
    pub data: BTreeMap<String, TelemetryValue>,
}

impl TelemetryEvent {
    /// Wire encoding for the batch upload payload. `session_id` is the game
    /// session active when the batch is sent.
    pub(crate) fn to_wire(&self, session_id: &str) -> serde_json::Value {
        let data: serde_json::Map<String, serde_json::Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        let mut event = json!({
            "clientTimeStamp": self.client_timestamp,
            "eventName": self.name,
            "gameId": self.game_id,
            "gameSessionId": session_id,
            "gameSessionEventOrder": self.event_order,
            "eventData": data,
            "totalTimePlayed": self.total_time_played,
        });

        let object = event.as_object_mut().unwrap();
        if let Some(device_id) = &self.device_id {
            object.insert("deviceId".to_string(), json!(device_id));
        }
        if let Some(client_version) = &self.client_version {
            object.insert("clientVersion".to_string(), json!(client_version));
        }
        if let Some(game_level) = &self.game_level {
            object.insert("gameLevel".to_string(), json!(game_level));
        }

        event
    }
}

/// Encodes a batch of queued events into the upload body.
pub(crate) fn encode_batch(events: &[TelemetryEvent], session_id: &str) -> String {
    let batch: Vec<serde_json::Value> = events.iter().map(|e| e.to_wire(session_id)).collect();
    serde_json::Value::Array(batch).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(data: BTreeMap<String, TelemetryValue>) -> TelemetryEvent {
        TelemetryEvent {
            name: "Evt".to_string(),
            client_timestamp: 1_700_000_000,
            game_id: "TEST".to_string(),
            event_order: 1,
            device_id: Some("device".to_string()),
            client_version: None,
            game_level: None,
            total_time_played: 0.0,
            data,
        }
    }

    #[test]
    fn value_width_survives_serde_round_trip() {
        let narrow = TelemetryValue::I8(3);
        let wide = TelemetryValue::I16(3);

        let narrow_json = serde_json::to_string(&narrow).unwrap();
        let wide_json = serde_json::to_string(&wide).unwrap();
        assert_ne!(narrow_json, wide_json);

        let narrow_back: TelemetryValue = serde_json::from_str(&narrow_json).unwrap();
        assert_eq!(narrow_back, narrow);
    }

    #[test]
    fn wire_encoding_binds_session_id_and_flattens_values() {
        let mut data = BTreeMap::new();
        data.insert("k1".to_string(), TelemetryValue::from("v"));
        data.insert("k2".to_string(), TelemetryValue::from(3i32));
        let wire = event_with(data).to_wire("session-9");

        assert_eq!(wire["gameSessionId"], "session-9");
        assert_eq!(wire["eventName"], "Evt");
        assert_eq!(wire["eventData"]["k1"], "v");
        assert_eq!(wire["eventData"]["k2"], 3);
        assert_eq!(wire["deviceId"], "device");
        assert!(wire.get("gameLevel").is_none());
    }

    #[test]
    fn batch_encoding_is_a_json_array() {
        let body = encode_batch(&[event_with(BTreeMap::new())], "");
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }
}
