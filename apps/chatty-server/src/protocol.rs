use serde::{Deserialize, Serialize};

/// Messages sent from client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join a room (opaque selector label).
    Join { room: String },
    /// Leave a room.
    Leave { room: String },
    /// Emit a named event; `room: None` broadcasts to all connections on
    /// every process.
    Emit {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        body: serde_json::Value,
    },
    /// Heartbeat to keep the connection alive.
    Ping,
}

/// Messages sent from the gateway to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A delivered event.
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        body: serde_json::Value,
    },
    /// Response to ping.
    Pong,
    /// Protocol-level error; the connection stays open.
    Error { message: String },
}

/// The envelope published to the broker. Immutable once published; it has no
/// identity beyond the broker's own delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    pub body: serde_json::Value,
}

impl BusEvent {
    pub fn into_frame(self) -> ServerFrame {
        ServerFrame::Event {
            event: self.event,
            room: self.room,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_frame_wire_shape() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"emit","event":"chat:new","body":"hi"}"#)
                .expect("parse ok");
        match frame {
            ClientFrame::Emit { event, room, body } => {
                assert_eq!(event, "chat:new");
                assert_eq!(room, None);
                assert_eq!(body, json!("hi"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn event_frame_omits_absent_room() {
        let frame = ServerFrame::Event {
            event: "chat:new".into(),
            room: None,
            body: json!("hi"),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "event", "event": "chat:new", "body": "hi"})
        );
    }
}
