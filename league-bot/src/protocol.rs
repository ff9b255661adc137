// Wire types exchanged with the gateway bridge.
//
// Inbound frames are tagged by `t` (platform event name), outbound frames by
// `op`. All identities are platform snowflakes carried as plain integers.

use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type RoleId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;

// ---------------------------------------------------------------------------
// Embed colours (platform palette)
// ---------------------------------------------------------------------------

pub mod colors {
    pub const RED: u32 = 0xE74C3C;
    pub const BLUE: u32 = 0x3498DB;
    pub const GOLD: u32 = 0xF1C40F;
    pub const GREEN: u32 = 0x2ECC71;
    pub const ORANGE: u32 = 0xE67E22;
    pub const DARK_GREY: u32 = 0x607D8B;
}

/// Render a user mention in platform markup.
pub fn mention(user_id: UserId) -> String {
    format!("<@{user_id}>")
}

// ---------------------------------------------------------------------------
// Shared payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl User {
    pub fn mention(&self) -> String {
        mention(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Attachment {
    /// Whether the attachment is an image. Trusts the MIME type when the
    /// platform supplies one, otherwise falls back to the file extension.
    pub fn is_image(&self) -> bool {
        if let Some(content_type) = &self.content_type {
            return content_type.starts_with("image/");
        }
        let lower = self.filename.to_ascii_lowercase();
        ["png", "jpg", "jpeg", "gif", "webp"]
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")))
    }
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEvent {
    /// Session established. Lists the channels the bot can post to.
    Ready(ReadyPayload),
    MessageCreate(MessagePayload),
    InteractionCreate(InteractionPayload),
    /// The bridge rejected the session (usually a bad token).
    InvalidSession { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub user: User,
    #[serde(default)]
    pub channels: Vec<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub author: User,
    /// Roles the author holds in the guild the message was posted in.
    #[serde(default)]
    pub member_roles: Vec<RoleId>,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionPayload {
    pub interaction_id: u64,
    pub channel_id: ChannelId,
    /// The message carrying the component that was clicked.
    pub message_id: MessageId,
    pub user: User,
    pub custom_id: String,
}

// ---------------------------------------------------------------------------
// Outbound actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayAction {
    Identify {
        token: String,
    },
    SendMessage {
        channel_id: ChannelId,
        message: OutgoingMessage,
    },
    /// Reply visible only to the user who triggered the interaction.
    EphemeralReply {
        interaction_id: u64,
        message: OutgoingMessage,
    },
    /// Disable every component attached to a message.
    DisableComponents {
        channel_id: ChannelId,
        message_id: MessageId,
    },
}

impl GatewayAction {
    /// Plain text message to a channel.
    pub fn reply(channel_id: ChannelId, text: impl Into<String>) -> Self {
        GatewayAction::SendMessage {
            channel_id,
            message: OutgoingMessage::text(text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Button>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        OutgoingMessage {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        OutgoingMessage {
            embed: Some(embed),
            ..Default::default()
        }
    }

    pub fn with_components(mut self, components: Vec<Button>) -> Self {
        self.components = components;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

impl Embed {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Embed {
            title: title.into(),
            description: None,
            color,
            fields: Vec::new(),
            thumbnail_url: None,
            timestamp: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
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

    pub fn thumbnail(mut self, url: Option<String>) -> Self {
        self.thumbnail_url = url;
        self
    }

    /// Stamp the embed with the current UTC time.
    pub fn timestamp_now(mut self) -> Self {
        self.timestamp = Some(chrono::Utc::now().to_rfc3339());
        self
    }

    /// Look up a field's value by name.
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}
