use chatroom_domain::{Role, RoleMask};
use chatroom_protocol::{
	ClientFrame, DEFAULT_MAX_FRAME_SIZE, EventResponse, ProtocolError, ServerMessage, ServerPayload, code, decode_frame,
	decode_join, decode_payload, encode_payload, role_badges,
};
use proptest::prelude::*;

#[test]
fn heartbeat_frames_are_bare_strings() {
	assert_eq!(decode_frame("ping", DEFAULT_MAX_FRAME_SIZE).unwrap(), ClientFrame::Ping);
	assert_eq!(decode_frame(" pong\n", DEFAULT_MAX_FRAME_SIZE).unwrap(), ClientFrame::Pong);
	assert_eq!(decode_frame("\"pong\"", DEFAULT_MAX_FRAME_SIZE).unwrap(), ClientFrame::Pong);
	assert_eq!(
		decode_frame("{\"message\":\"ping\"}", DEFAULT_MAX_FRAME_SIZE).unwrap(),
		ClientFrame::Json("{\"message\":\"ping\"}")
	);
}

#[test]
fn oversized_frames_are_rejected() {
	let big = "x".repeat(DEFAULT_MAX_FRAME_SIZE + 1);
	match decode_frame(&big, DEFAULT_MAX_FRAME_SIZE).unwrap_err() {
		ProtocolError::FrameTooLarge { len, max } => {
			assert_eq!(len, DEFAULT_MAX_FRAME_SIZE + 1);
			assert_eq!(max, DEFAULT_MAX_FRAME_SIZE);
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn join_request_rejects_null_rooms() {
	let missing = decode_join("{}").unwrap();
	assert!(matches!(missing.room_id(), Err(ProtocolError::MissingRoom)));

	let json_null = decode_join("{\"room\": null}").unwrap();
	assert!(matches!(json_null.room_id(), Err(ProtocolError::MissingRoom)));

	let literal_null = decode_join("{\"room\": \"null\"}").unwrap();
	assert!(matches!(literal_null.room_id(), Err(ProtocolError::InvalidRoom(_))));

	assert!(decode_join("{\"room\": 42}").is_err());

	let ok = decode_join("{\"room\": \"kidnotkin\", \"embed\": \" example.com \"}").unwrap();
	assert_eq!(ok.room_id().unwrap().as_str(), "kidnotkin");
	assert_eq!(ok.embed_source().as_deref(), Some("example.com"));
}

#[test]
fn client_payload_fields_are_independent() {
	let p = decode_payload("{\"message\":\"hi\",\"event\":1}").unwrap();
	assert_eq!(p.message.as_deref(), Some("hi"));
	assert!(p.command.is_none());
	assert!(p.request.is_none());

	let event = EventResponse::from_value(p.event.as_ref().unwrap()).unwrap();
	assert_eq!(event.option(), 1);
	assert_eq!(event.event_id(), None);

	let answer = EventResponse::from_value(&serde_json::json!({"id": "abc", "option": 2})).unwrap();
	assert_eq!(answer.option(), 2);
	assert_eq!(answer.event_id(), Some("abc"));

	assert!(EventResponse::from_value(&serde_json::json!("yes")).is_none());
	assert!(decode_payload("{}").unwrap().is_empty());
	assert!(decode_payload("not json").is_err());
}

#[test]
fn server_payloads_are_externally_tagged() {
	let msg = ServerPayload::ServerMessage(ServerMessage::new("Connected", code::CONNECTED_ANONYMOUS));
	let v: serde_json::Value = serde_json::from_str(&encode_payload(&msg).unwrap()).unwrap();
	assert_eq!(v, serde_json::json!({"ServerMessage": {"message": "Connected", "code": 2}}));

	let ev = ServerPayload::event("event-close", serde_json::json!({"tally": [0, 2, 0]}));
	let v: serde_json::Value = serde_json::from_str(&encode_payload(&ev).unwrap()).unwrap();
	assert_eq!(v["EventMessage"]["type"], "event-close");
	assert_eq!(v["EventMessage"]["data"]["tally"], serde_json::json!([0, 2, 0]));
}

#[test]
fn message_queue_embeds_raw_payloads_in_order() {
	let raw = ["{\"ChatMessage\":{\"username\":\"b\",\"message\":\"2\",\"roles\":[]}}", "not json", "{\"x\":1}"];
	let q = ServerPayload::message_queue(raw);
	let encoded = encode_payload(&q).unwrap();
	let v: serde_json::Value = serde_json::from_str(&encoded).unwrap();
	let items = v["MessageQueue"].as_array().unwrap();
	assert_eq!(items.len(), 2);
	assert_eq!(items[0]["ChatMessage"]["message"], "2");
	assert_eq!(items[1]["x"], 1);
}

#[test]
fn role_badges_follow_precedence() {
	let mask: RoleMask = [Role::SubTier1, Role::Moderator].into_iter().collect();
	let badges = role_badges(mask);
	assert_eq!(badges.len(), 2);
	assert_eq!(badges[0].name, "mod");
	assert_eq!(badges[0].value, Role::Moderator.bit());
	assert_eq!(badges[1].name, "sub");
}

proptest! {
	#[test]
	fn decode_never_panics(s in ".{0,256}") {
		let _ = decode_frame(&s, DEFAULT_MAX_FRAME_SIZE).map(|f| match f {
			ClientFrame::Json(json) => { let _ = decode_payload(json); let _ = decode_join(json); }
			ClientFrame::Ping | ClientFrame::Pong => {}
		});
	}

	#[test]
	fn chat_text_survives_encoding(text in "\\PC{0,200}") {
		let payload = ServerPayload::ChatMessage(chatroom_protocol::ChatMessage {
			username: "u".to_string(),
			message: text.clone(),
			roles: Vec::new(),
		});
		let encoded = encode_payload(&payload).unwrap();
		let v: serde_json::Value = serde_json::from_str(&encoded).unwrap();
		prop_assert_eq!(v["ChatMessage"]["message"].as_str().unwrap(), text.as_str());
	}
}
