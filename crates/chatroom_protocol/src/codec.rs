#![forbid(unsafe_code)]

use chatroom_domain::ParseIdError;
use thiserror::Error;

use crate::wire::{ClientPayload, JoinRequest, ServerPayload};

/// Default maximum accepted text frame size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024; // 16 KiB

/// Heartbeat probe sent by the server (bare text, outside the JSON envelope).
pub const PING: &str = "ping";
/// Heartbeat acknowledgement.
pub const PONG: &str = "pong";

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("missing room")]
	MissingRoom,

	#[error("invalid room: {0}")]
	InvalidRoom(ParseIdError),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// A decoded client text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame<'a> {
	Ping,
	Pong,
	Json(&'a str),
}

/// Classify a client text frame, enforcing the size limit.
pub fn decode_frame(text: &str, max_frame_size: usize) -> Result<ClientFrame<'_>, ProtocolError> {
	if text.len() > max_frame_size {
		return Err(ProtocolError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}

	let trimmed = text.trim();
	match trimmed {
		PING | "\"ping\"" => Ok(ClientFrame::Ping),
		PONG | "\"pong\"" => Ok(ClientFrame::Pong),
		_ => Ok(ClientFrame::Json(trimmed)),
	}
}

/// Decode the join payload sent while unbound.
pub fn decode_join(json: &str) -> Result<JoinRequest, ProtocolError> {
	Ok(serde_json::from_str(json)?)
}

/// Decode a payload sent by a bound connection.
pub fn decode_payload(json: &str) -> Result<ClientPayload, ProtocolError> {
	Ok(serde_json::from_str(json)?)
}

/// Encode a server payload as a JSON text frame.
pub fn encode_payload(payload: &ServerPayload) -> Result<String, ProtocolError> {
	Ok(serde_json::to_string(payload)?)
}
