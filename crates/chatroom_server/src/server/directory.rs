#![forbid(unsafe_code)]

use std::collections::HashSet;

use async_trait::async_trait;
use chatroom_domain::RoomId;

/// Answers whether a channel exists and may host a chat room.
#[async_trait]
pub trait RoomDirectory: Send + Sync + 'static {
	async fn room_exists(&self, room: &RoomId) -> bool;
}

/// Every syntactically valid room exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllRooms;

#[async_trait]
impl RoomDirectory for AllowAllRooms {
	async fn room_exists(&self, _room: &RoomId) -> bool {
		true
	}
}

/// Fixed allow-list loaded from config.
#[derive(Debug, Clone, Default)]
pub struct StaticRooms {
	rooms: HashSet<RoomId>,
}

impl StaticRooms {
	pub fn new(rooms: impl IntoIterator<Item = RoomId>) -> Self {
		Self {
			rooms: rooms.into_iter().collect(),
		}
	}

	pub fn len(&self) -> usize {
		self.rooms.len()
	}
}

#[async_trait]
impl RoomDirectory for StaticRooms {
	async fn room_exists(&self, room: &RoomId) -> bool {
		self.rooms.contains(room)
	}
}
