//! Frame types for the Tandem protocol.
//!
//! Every frame is an object tagged by its `type` member. Apart from the
//! session identifier (`uuid`), the server never interprets a field: every
//! other member lands in the frame's [`Fields`] and is written back out
//! exactly as the client sent it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A client-chosen session identifier.
pub type SessionId = String;

/// Frame members the relay carries without looking at them.
pub type Fields = Map<String, Value>;

/// Frame kind identifiers, as they appear in the `type` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    ControllerRegister,
    ObserverRegister,
    ControlSet,
    ControlSync,
    Unknown,
}

impl FrameKind {
    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::ControllerRegister => "controller:register",
            FrameKind::ObserverRegister => "observer:register",
            FrameKind::ControlSet => "control:set",
            FrameKind::ControlSync => "control:sync",
            FrameKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol frame.
///
/// `uuid` is optional at the type level so that a frame missing it still
/// decodes; the router treats such frames exactly like frames for an unknown
/// session. Catalog members such as `value`, `valueKind` and `timestamp` are
/// kept in `fields` with whatever JSON type the client gave them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Bind the sending connection as the controller of a session.
    #[serde(rename = "controller:register")]
    ControllerRegister {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid: Option<SessionId>,
        /// Usually `timestamp`.
        #[serde(flatten)]
        fields: Fields,
    },

    /// Add the sending connection to a session's observers.
    #[serde(rename = "observer:register")]
    ObserverRegister {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid: Option<SessionId>,
        /// Usually `timestamp`.
        #[serde(flatten)]
        fields: Fields,
    },

    /// Control command, observer to controller.
    #[serde(rename = "control:set")]
    ControlSet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid: Option<SessionId>,
        /// Usually `value`, nominally 0..=255.
        #[serde(flatten)]
        fields: Fields,
    },

    /// State sync, controller to observers.
    #[serde(rename = "control:sync")]
    ControlSync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid: Option<SessionId>,
        /// Usually `value` and `valueKind`.
        #[serde(flatten)]
        fields: Fields,
    },

    /// Any `type` outside the catalog.
    #[serde(other)]
    Unknown,
}

impl Frame {
    /// Get the frame kind.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::ControllerRegister { .. } => FrameKind::ControllerRegister,
            Frame::ObserverRegister { .. } => FrameKind::ObserverRegister,
            Frame::ControlSet { .. } => FrameKind::ControlSet,
            Frame::ControlSync { .. } => FrameKind::ControlSync,
            Frame::Unknown => FrameKind::Unknown,
        }
    }

    /// The session this frame addresses, if it carries one.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        match self {
            Frame::ControllerRegister { uuid, .. }
            | Frame::ObserverRegister { uuid, .. }
            | Frame::ControlSet { uuid, .. }
            | Frame::ControlSync { uuid, .. } => uuid.as_deref(),
            Frame::Unknown => None,
        }
    }

    /// Every member except `type` and `uuid`.
    #[must_use]
    pub fn fields(&self) -> Option<&Fields> {
        match self {
            Frame::ControllerRegister { fields, .. }
            | Frame::ObserverRegister { fields, .. }
            | Frame::ControlSet { fields, .. }
            | Frame::ControlSync { fields, .. } => Some(fields),
            Frame::Unknown => None,
        }
    }

    /// Look up a single pass-through member.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields()?.get(name)
    }

    /// Create a new `controller:register` frame.
    #[must_use]
    pub fn controller_register(uuid: impl Into<SessionId>, timestamp: u64) -> Self {
        Frame::ControllerRegister {
            uuid: Some(uuid.into()),
            fields: fields([("timestamp", timestamp.into())]),
        }
    }

    /// Create a new `observer:register` frame.
    #[must_use]
    pub fn observer_register(uuid: impl Into<SessionId>, timestamp: u64) -> Self {
        Frame::ObserverRegister {
            uuid: Some(uuid.into()),
            fields: fields([("timestamp", timestamp.into())]),
        }
    }

    /// Create a new `control:set` frame.
    #[must_use]
    pub fn control_set(uuid: impl Into<SessionId>, value: u8) -> Self {
        Frame::ControlSet {
            uuid: Some(uuid.into()),
            fields: fields([("value", value.into())]),
        }
    }

    /// Create a new `control:sync` frame.
    #[must_use]
    pub fn control_sync(
        uuid: impl Into<SessionId>,
        value: u8,
        value_kind: impl Into<String>,
    ) -> Self {
        Frame::ControlSync {
            uuid: Some(uuid.into()),
            fields: fields([
                ("value", value.into()),
                ("valueKind", Value::String(value_kind.into())),
            ]),
        }
    }
}

fn fields<const N: usize>(members: [(&str, Value); N]) -> Fields {
    members
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_kind() {
        assert_eq!(
            Frame::controller_register("A", 1).kind(),
            FrameKind::ControllerRegister
        );
        assert_eq!(Frame::control_set("A", 200).kind(), FrameKind::ControlSet);
        assert_eq!(FrameKind::ControlSync.to_string(), "control:sync");
    }

    #[test]
    fn test_wire_names() {
        let value = serde_json::to_value(Frame::control_sync("A", 50, "kindB")).unwrap();
        assert_eq!(
            value,
            json!({"type": "control:sync", "uuid": "A", "value": 50, "valueKind": "kindB"})
        );

        let value = serde_json::to_value(Frame::observer_register("A", 1_700_000_000_000)).unwrap();
        assert_eq!(
            value,
            json!({"type": "observer:register", "uuid": "A", "timestamp": 1_700_000_000_000_u64})
        );
    }

    #[test]
    fn test_missing_uuid_still_decodes() {
        let frame: Frame = serde_json::from_value(json!({"type": "control:set", "value": 3})).unwrap();
        assert_eq!(frame.kind(), FrameKind::ControlSet);
        assert_eq!(frame.session(), None);
        assert_eq!(frame.field("value"), Some(&json!(3)));
    }

    #[test]
    fn test_unknown_type() {
        let frame: Frame = serde_json::from_value(json!({"type": "chat:message", "uuid": "A"})).unwrap();
        assert_eq!(frame, Frame::Unknown);
        assert_eq!(frame.session(), None);
        assert_eq!(frame.fields(), None);
    }

    #[test]
    fn test_values_are_not_validated() {
        let frame: Frame = serde_json::from_value(json!({
            "type": "control:sync",
            "uuid": "A",
            "value": 9000,
            "valueKind": 2
        }))
        .unwrap();
        assert_eq!(frame.field("value"), Some(&json!(9000)));
        assert_eq!(frame.field("valueKind"), Some(&json!(2)));

        let frame: Frame = serde_json::from_value(json!({
            "type": "controller:register",
            "uuid": "A",
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(frame.session(), Some("A"));
        assert_eq!(frame.field("timestamp"), Some(&json!("2024-01-01T00:00:00Z")));
    }

    #[test]
    fn test_extra_members_pass_through() {
        let sent = json!({
            "type": "control:set",
            "uuid": "A",
            "value": 200,
            "channel": "red",
            "meta": {"seq": 4, "tags": [1, null]},
            "note": null
        });

        let frame: Frame = serde_json::from_value(sent.clone()).unwrap();
        assert_eq!(frame.session(), Some("A"));
        assert_eq!(frame.field("channel"), Some(&json!("red")));
        assert_eq!(serde_json::to_value(&frame).unwrap(), sent);
    }
}
