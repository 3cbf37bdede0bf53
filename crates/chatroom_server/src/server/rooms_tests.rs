#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatroom_domain::{Identity, RoleMask, RoomId, UserId};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::server::audit::AuditService;
use crate::server::bridge::{BridgeError, BridgeFrame, BridgeSubscription, LocalBridge, PubSubBridge};
use crate::server::registry::{ConnHandle, Outbound};
use crate::server::room::{JoinOutcome, RoomConfig, RoomContext};
use crate::server::rooms::RoomManager;

const SLOW_SUBSCRIBE: Duration = Duration::from_secs(10);

/// Local bridge whose subscribe to room "slow" stalls like a remote round trip.
#[derive(Default)]
struct StallingBridge {
	inner: LocalBridge,
	subscribes: AtomicUsize,
}

#[async_trait]
impl PubSubBridge for StallingBridge {
	fn process_id(&self) -> &str {
		self.inner.process_id()
	}

	fn topic_prefix(&self) -> &str {
		self.inner.topic_prefix()
	}

	async fn publish_frame(&self, room: &RoomId, frame: BridgeFrame) -> Result<(), BridgeError> {
		self.inner.publish_frame(room, frame).await
	}

	async fn subscribe(&self, room: &RoomId) -> Result<BridgeSubscription, BridgeError> {
		self.subscribes.fetch_add(1, Ordering::SeqCst);
		if room.as_str() == "slow" {
			tokio::time::sleep(SLOW_SUBSCRIBE).await;
		}
		self.inner.subscribe(room).await
	}
}

fn manager() -> (RoomManager, Arc<StallingBridge>) {
	let bridge = Arc::new(StallingBridge::default());
	let rooms = RoomManager::new(RoomContext {
		bridge: bridge.clone(),
		audit: AuditService::disabled(),
		config: RoomConfig::default(),
	});
	(rooms, bridge)
}

fn room(id: &str) -> RoomId {
	RoomId::new(id).expect("valid RoomId")
}

fn client(id: u64) -> (Identity, ConnHandle, mpsc::Receiver<Outbound>) {
	let (tx, rx) = mpsc::channel(16);
	let identity = Identity::user(UserId::new(format!("u{id}")).unwrap(), format!("U{id}"), RoleMask::NONE);
	(identity, ConnHandle::new(id, None, None, tx), rx)
}

#[tokio::test(start_paused = true)]
async fn slow_subscribe_does_not_block_other_rooms() {
	let (rooms, _bridge) = manager();
	let fast = room("fast");

	let (alice, alice_conn, _alice_rx) = client(1);
	let (_, outcome) = rooms.join(&fast, &alice, &alice_conn).await.unwrap();
	assert_eq!(outcome, JoinOutcome::Joined);

	let creating = {
		let rooms = rooms.clone();
		tokio::spawn(async move { rooms.handle(&room("slow")).await.map(|h| h.room().clone()) })
	};
	tokio::task::yield_now().await;

	let (bob, bob_conn, _bob_rx) = client(2);
	let joined = timeout(Duration::from_secs(1), rooms.join(&fast, &bob, &bob_conn))
		.await
		.expect("join to a running room waited on another room's subscribe")
		.unwrap();
	assert_eq!(joined.1, JoinOutcome::Joined);

	let stats = timeout(Duration::from_secs(1), rooms.stats())
		.await
		.expect("stats waited on another room's subscribe");
	assert_eq!(stats.len(), 1);
	assert_eq!(stats[0].connections, 2);

	assert_eq!(creating.await.unwrap().unwrap(), room("slow"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_joiners_of_a_new_room_share_one_actor() {
	let (rooms, bridge) = manager();

	let first = {
		let rooms = rooms.clone();
		tokio::spawn(async move { rooms.handle(&room("slow")).await })
	};
	let second = {
		let rooms = rooms.clone();
		tokio::spawn(async move { rooms.handle(&room("slow")).await })
	};

	let first = first.await.unwrap().unwrap();
	let second = second.await.unwrap().unwrap();
	assert_eq!(first.room(), second.room());
	assert_eq!(bridge.subscribes.load(Ordering::SeqCst), 1);

	let (carol, carol_conn, mut carol_rx) = client(3);
	rooms.join(&room("slow"), &carol, &carol_conn).await.unwrap();
	assert!(matches!(carol_rx.recv().await, Some(Outbound::Text(_))));
	assert_eq!(rooms.stats().await.len(), 1);
}
