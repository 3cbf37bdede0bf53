#![forbid(unsafe_code)]

use chatroom_domain::{Role, RoleMask, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::codec::ProtocolError;

/// `ServerMessage.code` values.
pub mod code {
	pub const BANNED: u16 = 0x000;
	pub const CONNECTED: u16 = 0x001;
	pub const CONNECTED_ANONYMOUS: u16 = 0x002;
	pub const NOTICE: u16 = 0x003;
	pub const ERROR: u16 = 0x004;
}

/// First payload a client sends: `{"room": "<channel-id>"}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinRequest {
	#[serde(default)]
	pub room: Option<String>,

	/// Where the player is embedded (used for viewer aggregation).
	#[serde(default)]
	pub embed: Option<String>,
}

impl JoinRequest {
	pub fn room_id(&self) -> Result<RoomId, ProtocolError> {
		let Some(room) = self.room.as_deref() else {
			return Err(ProtocolError::MissingRoom);
		};
		RoomId::new(room).map_err(ProtocolError::InvalidRoom)
	}

	pub fn embed_source(&self) -> Option<String> {
		self.embed
			.as_deref()
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(|s| s.chars().take(128).collect())
	}
}

/// Payload sent by a client after joining. Every field is optional and handled independently.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientPayload {
	#[serde(default)]
	pub message: Option<String>,
	#[serde(default)]
	pub command: Option<String>,
	#[serde(default)]
	pub request: Option<String>,
	#[serde(default)]
	pub event: Option<serde_json::Value>,
}

impl ClientPayload {
	pub fn is_empty(&self) -> bool {
		self.message.is_none() && self.command.is_none() && self.request.is_none() && self.event.is_none()
	}
}

/// A response routed into the active chat event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EventResponse {
	Index(u32),
	Answer {
		#[serde(default)]
		id: Option<String>,
		option: u32,
	},
}

impl EventResponse {
	pub fn from_value(value: &serde_json::Value) -> Option<Self> {
		serde_json::from_value(value.clone()).ok()
	}

	pub fn option(&self) -> u32 {
		match self {
			EventResponse::Index(o) => *o,
			EventResponse::Answer { option, .. } => *option,
		}
	}

	pub fn event_id(&self) -> Option<&str> {
		match self {
			EventResponse::Index(_) => None,
			EventResponse::Answer { id, .. } => id.as_deref(),
		}
	}
}

/// Server → client payloads. Serialized externally tagged: `{"ServerMessage": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerPayload {
	ServerMessage(ServerMessage),
	EventMessage(EventMessage),
	/// History replay, newest first.
	MessageQueue(Vec<Box<RawValue>>),
	ChatMessage(ChatMessage),
}

impl ServerPayload {
	/// Build a `MessageQueue` from raw encoded payloads; invalid entries are skipped.
	pub fn message_queue<'a>(entries: impl IntoIterator<Item = &'a str>) -> Self {
		let items = entries
			.into_iter()
			.filter_map(|raw| RawValue::from_string(raw.to_string()).ok())
			.collect();
		ServerPayload::MessageQueue(items)
	}

	pub fn notice(message: impl Into<String>) -> Self {
		ServerPayload::ServerMessage(ServerMessage::new(message, code::NOTICE).with_status("info"))
	}

	pub fn error(message: impl Into<String>) -> Self {
		ServerPayload::ServerMessage(ServerMessage::new(message, code::ERROR).with_status("error"))
	}

	pub fn event(kind: impl Into<String>, data: serde_json::Value) -> Self {
		ServerPayload::EventMessage(EventMessage {
			kind: kind.into(),
			data,
		})
	}

	pub fn kind(&self) -> &'static str {
		match self {
			ServerPayload::ServerMessage(_) => "ServerMessage",
			ServerPayload::EventMessage(_) => "EventMessage",
			ServerPayload::MessageQueue(_) => "MessageQueue",
			ServerPayload::ChatMessage(_) => "ChatMessage",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
	pub code: u16,
}

impl ServerMessage {
	pub fn new(message: impl Into<String>, code: u16) -> Self {
		Self {
			message: message.into(),
			icon: None,
			status: None,
			code,
		}
	}

	pub fn with_status(mut self, status: impl Into<String>) -> Self {
		self.status = Some(status.into());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
	#[serde(rename = "type")]
	pub kind: String,
	pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub username: String,
	pub message: String,
	pub roles: Vec<RoleBadge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBadge {
	pub name: String,
	pub icon: String,
	pub value: u32,
	pub color: String,
}

impl From<Role> for RoleBadge {
	fn from(role: Role) -> Self {
		Self {
			name: role.as_str().to_string(),
			icon: role.icon().to_string(),
			value: role.bit(),
			color: role.color().to_string(),
		}
	}
}

/// Badges for every role in the mask, highest precedence first.
pub fn role_badges(mask: RoleMask) -> Vec<RoleBadge> {
	mask.roles().map(RoleBadge::from).collect()
}
