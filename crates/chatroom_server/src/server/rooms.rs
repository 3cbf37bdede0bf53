#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chatroom_domain::{Identity, RoomId};
use tokio::sync::{Mutex, OnceCell, oneshot};
use tracing::debug;

use crate::server::bridge::BridgeError;
use crate::server::registry::ConnHandle;
use crate::server::room::{JoinOutcome, RoomCommand, RoomContext, RoomHandle, RoomStats, spawn_room};

/// Attempts made when a room shuts down between lookup and join.
const JOIN_ATTEMPTS: usize = 3;

/// A room's actor, filled once its bridge subscription is up.
type RoomSlot = Arc<OnceCell<RoomHandle>>;

/// Lazily spawns one actor per room and hands out their mailboxes.
///
/// The map lock only guards slot lookup; subscribing happens outside it, so a slow bridge only
/// holds up joiners of the room being created.
#[derive(Clone)]
pub struct RoomManager {
	ctx: RoomContext,
	rooms: Arc<Mutex<HashMap<RoomId, RoomSlot>>>,
}

impl RoomManager {
	pub fn new(ctx: RoomContext) -> Self {
		Self {
			ctx,
			rooms: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Running actor for `room`, spawning (or respawning) it if needed.
	pub async fn handle(&self, room: &RoomId) -> Result<RoomHandle, BridgeError> {
		let slot = {
			let mut rooms = self.rooms.lock().await;
			let slot = rooms.entry(room.clone()).or_default();
			if slot.get().is_some_and(RoomHandle::is_closed) {
				*slot = RoomSlot::default();
			}
			Arc::clone(slot)
		};

		let handle = slot
			.get_or_try_init(|| spawn_room(room.clone(), self.ctx.clone()))
			.await?;
		Ok(handle.clone())
	}

	/// Join `conn` to `room`, retrying on a fresh actor if the current one tore down mid-join.
	pub async fn join(&self, room: &RoomId, identity: &Identity, conn: &ConnHandle) -> anyhow::Result<(RoomHandle, JoinOutcome)> {
		for attempt in 1..=JOIN_ATTEMPTS {
			let handle = self.handle(room).await?;
			let (reply_tx, reply_rx) = oneshot::channel();
			let cmd = RoomCommand::Join {
				identity: identity.clone(),
				conn: conn.clone(),
				reply: reply_tx,
			};

			if handle.send(cmd).await.is_err() {
				debug!(%room, attempt, "room closed before join; retrying");
				continue;
			}

			match reply_rx.await {
				Ok(outcome) => return Ok((handle, outcome)),
				Err(_) => debug!(%room, attempt, "room dropped join; retrying"),
			}
		}

		Err(anyhow!("room {room} unavailable"))
	}

	/// Accounting for every live room.
	pub async fn stats(&self) -> Vec<RoomStats> {
		let handles: Vec<RoomHandle> = {
			let mut rooms = self.rooms.lock().await;
			rooms.retain(|_, slot| !slot.get().is_some_and(RoomHandle::is_closed));
			rooms.values().filter_map(|slot| slot.get().cloned()).collect()
		};

		let mut out = Vec::with_capacity(handles.len());
		for handle in handles {
			let (tx, rx) = oneshot::channel();
			if handle.send(RoomCommand::Stats { reply: tx }).await.is_err() {
				continue;
			}
			if let Ok(stats) = rx.await {
				out.push(stats);
			}
		}
		out.sort_by(|a, b| a.room.cmp(&b.room));
		out
	}
}
