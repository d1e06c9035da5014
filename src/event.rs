//! Event model: types, terminal classification, and wire serialization.
//!
//! Events are append-only and monotonically sequenced per request in the
//! durable store. The `time` field on the wire is stamped at serialization
//! and never persisted.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::ids;

/// Event types emitted over a request's lifetime.
///
/// Exactly one terminal event (`user.submitted`, `request.expired`, or
/// `notify.failed`) is emitted per request id over its entire history.
/// `heartbeat` is stream-only and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    RequestCreated,
    NotifySent,
    NotifyFailed,
    UserPageLoaded,
    UserSubmitted,
    RequestExpired,
    Heartbeat,
}

/// The three event types that end a request's lifecycle.
pub const TERMINAL_EVENT_TYPES: [EventType; 3] = [
    EventType::UserSubmitted,
    EventType::RequestExpired,
    EventType::NotifyFailed,
];

impl EventType {
    /// Wire and storage name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCreated => "request.created",
            Self::NotifySent => "notify.sent",
            Self::NotifyFailed => "notify.failed",
            Self::UserPageLoaded => "user.page_loaded",
            Self::UserSubmitted => "user.submitted",
            Self::RequestExpired => "request.expired",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Parses a storage/wire name back into a type.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request.created" => Some(Self::RequestCreated),
            "notify.sent" => Some(Self::NotifySent),
            "notify.failed" => Some(Self::NotifyFailed),
            "user.page_loaded" => Some(Self::UserPageLoaded),
            "user.submitted" => Some(Self::UserSubmitted),
            "request.expired" => Some(Self::RequestExpired),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// True for the three types that end a request's lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::UserSubmitted | Self::RequestExpired | Self::NotifyFailed
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event scoped to one request.
#[derive(Debug, Clone)]
pub struct Event {
    /// Opaque `evt_`-prefixed id; empty for stream-only heartbeats.
    pub id: String,
    pub event_type: EventType,
    pub request_id: String,
    /// Opaque payload agreed per type.
    pub data: Value,
}

/// Wire form of an event: `{id, type, time, request_id, data}`.
#[derive(Debug, Serialize)]
pub struct WireEvent<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub time: String,
    pub request_id: &'a str,
    pub data: &'a Value,
}

impl Event {
    /// Creates an event with a freshly minted id.
    #[must_use]
    pub fn new(request_id: impl Into<String>, event_type: EventType, data: Value) -> Self {
        Self {
            id: ids::new_event_id(),
            event_type,
            request_id: request_id.into(),
            data,
        }
    }

    /// Creates a stream-only heartbeat (empty id, empty payload).
    #[must_use]
    pub fn heartbeat(request_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            event_type: EventType::Heartbeat,
            request_id: request_id.into(),
            data: Value::Object(serde_json::Map::new()),
        }
    }

    /// Serializes to the wire shape, stamping `time` now in RFC 3339 UTC.
    #[must_use]
    pub fn to_wire(&self) -> WireEvent<'_> {
        WireEvent {
            id: &self.id,
            event_type: self.event_type.as_str(),
            time: now_rfc3339(),
            request_id: &self.request_id,
            data: &self.data,
        }
    }

    /// Wire JSON as a string, stamped at call time.
    #[must_use]
    pub fn to_wire_json(&self) -> String {
        serde_json::to_string(&self.to_wire()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Current time in RFC 3339 UTC with second precision.
#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_round_trip() {
        for t in [
            EventType::RequestCreated,
            EventType::NotifySent,
            EventType::NotifyFailed,
            EventType::UserPageLoaded,
            EventType::UserSubmitted,
            EventType::RequestExpired,
            EventType::Heartbeat,
        ] {
            assert_eq!(EventType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EventType::parse("something.else"), None);
    }

    #[test]
    fn exactly_three_types_are_terminal() {
        assert!(EventType::UserSubmitted.is_terminal());
        assert!(EventType::RequestExpired.is_terminal());
        assert!(EventType::NotifyFailed.is_terminal());
        assert!(!EventType::RequestCreated.is_terminal());
        assert!(!EventType::NotifySent.is_terminal());
        assert!(!EventType::UserPageLoaded.is_terminal());
        assert!(!EventType::Heartbeat.is_terminal());
    }

    #[test]
    fn wire_shape_carries_stamped_time() {
        let ev = Event::new("req_x", EventType::RequestExpired, serde_json::json!({}));
        let wire: serde_json::Value = serde_json::from_str(&ev.to_wire_json()).unwrap();
        assert_eq!(wire["type"], "request.expired");
        assert_eq!(wire["request_id"], "req_x");
        assert_eq!(wire["id"], serde_json::json!(ev.id));
        assert!(wire["time"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn heartbeat_has_empty_id_and_payload() {
        let hb = Event::heartbeat("req_x");
        assert!(hb.id.is_empty());
        assert_eq!(hb.data, serde_json::json!({}));
    }
}
