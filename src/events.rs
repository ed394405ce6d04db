//! Typed gateway events.
//!
//! The gateway driver turns raw payloads into [`GatewayEvent`] so the bot
//! only pattern-matches on the handful of events it reacts to.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::{GatewayPayload, Message, Opcode, ReadyEvent};

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// IDENTIFY succeeded.
    Ready(ReadyEvent),
    /// A RESUME replayed all missed events.
    Resumed,
    MessageCreate(Message),
    HeartbeatAck,
    /// The gateway wants a heartbeat right now (op 1).
    HeartbeatRequest,
    Reconnect,
    /// Op 9; `true` when the session can still be resumed.
    InvalidSession(bool),
    /// Op 10 arriving outside the handshake.
    Hello { heartbeat_interval: u64 },
    Unknown {
        event_name: Option<String>,
        op: u8,
    },
}

impl GatewayEvent {
    /// Never fails; anything unrecognised or malformed becomes `Unknown`.
    pub fn from_payload(payload: GatewayPayload) -> Self {
        let unknown = |payload: &GatewayPayload| GatewayEvent::Unknown {
            event_name: payload.t.clone(),
            op: payload.op,
        };

        match Opcode::from_u8(payload.op) {
            Some(Opcode::Dispatch) => Self::parse_dispatch(payload),
            Some(Opcode::Heartbeat) => GatewayEvent::HeartbeatRequest,
            Some(Opcode::Reconnect) => GatewayEvent::Reconnect,
            Some(Opcode::InvalidSession) => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            Some(Opcode::HeartbeatAck) => GatewayEvent::HeartbeatAck,
            Some(Opcode::Hello) => match hello_interval(&payload) {
                Some(heartbeat_interval) => GatewayEvent::Hello { heartbeat_interval },
                None => unknown(&payload),
            },
            _ => unknown(&payload),
        }
    }

    fn parse_dispatch(payload: GatewayPayload) -> Self {
        let GatewayPayload { op, d, t, .. } = payload;
        let parsed = match (t.as_deref(), d) {
            (Some("READY"), Some(d)) => typed(&t, d).map(GatewayEvent::Ready),
            (Some("MESSAGE_CREATE"), Some(d)) => typed(&t, d).map(GatewayEvent::MessageCreate),
            (Some("RESUMED"), _) => Some(GatewayEvent::Resumed),
            _ => None,
        };
        parsed.unwrap_or(GatewayEvent::Unknown { event_name: t, op })
    }
}

fn typed<T: DeserializeOwned>(name: &Option<String>, d: serde_json::Value) -> Option<T> {
    match serde_json::from_value(d) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(event = ?name, error = %e, "failed to parse dispatch payload");
            None
        }
    }
}

/// `heartbeat_interval` in milliseconds from an op 10 payload.
pub fn hello_interval(payload: &GatewayPayload) -> Option<u64> {
    if payload.op != Opcode::Hello as u8 {
        return None;
    }
    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> GatewayPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_message_create() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0,
            "s": 3,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "10",
                "channel_id": "20",
                "guild_id": "30",
                "author": { "id": "40", "username": "myra-fan" },
                "content": "!bless",
                "timestamp": "2024-05-01T12:00:00+00:00"
            }
        })));
        match event {
            GatewayEvent::MessageCreate(msg) => {
                assert_eq!(msg.content, "!bless");
                assert_eq!(msg.author.id, "40");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parses_ready() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0,
            "s": 1,
            "t": "READY",
            "d": {
                "v": 10,
                "user": { "id": "1", "username": "Myra", "bot": true },
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.discord.gg",
                "guilds": [{ "id": "5", "unavailable": true }],
                "application": { "id": "1", "flags": 0 }
            }
        })));
        match event {
            GatewayEvent::Ready(ready) => {
                assert_eq!(ready.session_id, "abc");
                assert!(ready.user.bot);
                assert_eq!(ready.guilds.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn malformed_dispatch_becomes_unknown() {
        let event = GatewayEvent::from_payload(payload(json!({
            "op": 0,
            "t": "MESSAGE_CREATE",
            "d": { "id": 5 }
        })));
        assert!(matches!(
            event,
            GatewayEvent::Unknown { event_name: Some(ref n), op: 0 } if n == "MESSAGE_CREATE"
        ));
    }

    #[test]
    fn control_opcodes() {
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 11 }))),
            GatewayEvent::HeartbeatAck
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 1, "d": 4 }))),
            GatewayEvent::HeartbeatRequest
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 7 }))),
            GatewayEvent::Reconnect
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 9, "d": true }))),
            GatewayEvent::InvalidSession(true)
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 9, "d": false }))),
            GatewayEvent::InvalidSession(false)
        ));
        assert!(matches!(
            GatewayEvent::from_payload(payload(json!({ "op": 0, "t": "RESUMED", "d": {} }))),
            GatewayEvent::Resumed
        ));
    }

    #[test]
    fn hello_interval_read_from_payload() {
        let hello = payload(json!({ "op": 10, "d": { "heartbeat_interval": 41250 } }));
        assert_eq!(hello_interval(&hello), Some(41250));
        assert!(matches!(
            GatewayEvent::from_payload(hello),
            GatewayEvent::Hello { heartbeat_interval: 41250 }
        ));

        let ack = payload(json!({ "op": 11 }));
        assert_eq!(hello_interval(&ack), None);
    }
}
