//! Typed representations of the Discord API objects the bot touches.
//!
//! Only the fields we read or send are modelled; everything else in a payload
//! is ignored by serde.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_repr::Serialize_repr;

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Discord IDs are snowflakes transmitted as strings in JSON.
pub type Snowflake = String;

// ---------------------------------------------------------------------------
// Gateway envelope
// ---------------------------------------------------------------------------

/// Gateway opcodes we send or react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum Opcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Resume = 6,
    Reconnect = 7,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl Opcode {
    pub fn from_u8(op: u8) -> Option<Self> {
        match op {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

/// Inbound envelope wrapping every WebSocket message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Option<serde_json::Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

/// Outbound envelope. `d` is always present on the sends we make.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundPayload {
    pub op: Opcode,
    pub d: serde_json::Value,
}

bitflags! {
    /// Gateway intents bitmask sent with IDENTIFY.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Intents: u32 {
        const GUILDS = 1;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MESSAGES = 1 << 9;
        const DIRECT_MESSAGES = 1 << 12;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: Option<String>,
    #[serde(default)]
    pub bot: bool,
    pub global_name: Option<String>,
}

impl User {
    /// `Username#Discriminator` or just `Username` for the new username system.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some("0") | None => self.username.clone(),
            Some(disc) => format!("{}#{}", self.username, disc),
        }
    }

    /// Global display name if set, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

/// Guild-specific member data attached to guild messages.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartialMember {
    pub nick: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author: User,
    /// Present on MESSAGE_CREATE in guilds.
    pub member: Option<PartialMember>,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
}

impl Message {
    /// Name to address the author by: server nickname, then global name,
    /// then username.
    pub fn author_display_name(&self) -> &str {
        self.member
            .as_ref()
            .and_then(|m| m.nick.as_deref())
            .unwrap_or_else(|| self.author.display_name())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Snowflake>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<Snowflake>,
    #[serde(default)]
    pub fail_if_not_exists: bool,
}

/// Attachment metadata sent alongside a multipart upload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartialAttachment {
    pub id: u32,
    pub filename: String,
}

// ---------------------------------------------------------------------------
// Embed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedMedia>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    /// Point the embed image at an uploaded file of the same message.
    pub fn attachment_image(mut self, filename: &str) -> Self {
        self.image = Some(EmbedMedia {
            url: format!("attachment://{}", filename),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmbedMedia {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

// ---------------------------------------------------------------------------
// READY event payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyEvent {
    pub v: u8,
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    pub application: ReadyApplication,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyApplication {
    pub id: Snowflake,
    pub flags: Option<u64>,
}

// ---------------------------------------------------------------------------
// Outbound message body (for REST POST /channels/{id}/messages)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<Vec<Embed>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<PartialAttachment>>,
}

impl CreateMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.get_or_insert_with(Vec::new).push(embed);
        self
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.message_reference = Some(MessageReference {
            message_id: Some(message_id.into()),
            channel_id: None,
            fail_if_not_exists: false,
        });
        self
    }

    /// Declare an uploaded file; `id` is its `files[n]` index.
    pub fn attachment(mut self, id: u32, filename: impl Into<String>) -> Self {
        self.attachments
            .get_or_insert_with(Vec::new)
            .push(PartialAttachment {
                id,
                filename: filename.into(),
            });
        self
    }
}

// ---------------------------------------------------------------------------
// Rate-limit info parsed from response headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_after: Option<f64>,
    pub bucket: Option<String>,
    pub is_global: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(global_name: Option<&str>) -> User {
        serde_json::from_value(json!({
            "id": "789",
            "username": "alice",
            "discriminator": "0",
            "global_name": global_name,
        }))
        .expect("valid user JSON")
    }

    #[test]
    fn gateway_payload_deserializes() {
        let payload: GatewayPayload =
            serde_json::from_str(r#"{"op":0,"d":null,"s":1,"t":"READY"}"#).unwrap();
        assert_eq!(payload.op, 0);
        assert_eq!(payload.s, Some(1));
        assert_eq!(payload.t.as_deref(), Some("READY"));
    }

    #[test]
    fn outbound_payload_encodes_opcode_as_integer() {
        let payload = OutboundPayload {
            op: Opcode::Heartbeat,
            d: json!(42),
        };
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({"op": 1, "d": 42}));
    }

    #[test]
    fn intents_bits() {
        let intents = Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT;
        assert_eq!(intents.bits(), 512 | 32768);
    }

    #[test]
    fn user_tag_and_display_name() {
        let plain = user(None);
        assert_eq!(plain.tag(), "alice");
        assert_eq!(plain.display_name(), "alice");
        assert_eq!(user(Some("Alice A.")).display_name(), "Alice A.");
    }

    #[test]
    fn message_display_name_prefers_nickname() {
        let msg: Message = serde_json::from_value(json!({
            "id": "1",
            "channel_id": "2",
            "guild_id": "3",
            "author": {"id": "4", "username": "bob", "global_name": "Bobby"},
            "member": {"nick": "The Bob"},
            "content": "!bless",
            "timestamp": "2024-01-01T00:00:00+00:00",
        }))
        .unwrap();
        assert_eq!(msg.author_display_name(), "The Bob");
    }

    #[test]
    fn create_message_serializes_only_set_fields() {
        let msg = CreateMessage::new().content("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"content\":\"test\""));
        assert!(!json.contains("embeds"));
        assert!(!json.contains("attachments"));
    }

    #[test]
    fn embed_with_attachment_image() {
        let msg = CreateMessage::new()
            .embed(
                Embed::new()
                    .title("Bad Fortune")
                    .color(0x95A5A6)
                    .attachment_image("badluck.jpg"),
            )
            .attachment(0, "badluck.jpg")
            .reply_to("99");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["embeds"][0]["image"]["url"], "attachment://badluck.jpg");
        assert_eq!(value["attachments"][0], json!({"id": 0, "filename": "badluck.jpg"}));
        assert_eq!(value["message_reference"]["message_id"], "99");
    }
}
