#![forbid(unsafe_code)]

pub mod codec;
pub mod wire;

pub use codec::{
	ClientFrame, DEFAULT_MAX_FRAME_SIZE, PING, PONG, ProtocolError, decode_frame, decode_join, decode_payload,
	encode_payload,
};
pub use wire::{
	ChatMessage, ClientPayload, EventMessage, EventResponse, JoinRequest, RoleBadge, ServerMessage, ServerPayload, code,
	role_badges,
};

