#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chatroom_domain::RoomId;
use futures_util::StreamExt as _;
use redis::AsyncCommands as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::server::ledger::LedgerOp;
use crate::server::poll::PollOp;

pub const DEFAULT_TOPIC_PREFIX: &str = "chat:";

/// Frame carried on a room topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeFrame {
	/// Publishing process; ledger and poll frames are skipped by their own origin.
	pub origin: String,
	#[serde(flatten)]
	pub body: BridgeBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeBody {
	/// Encoded `ChatMessage`, recorded in history before fan-out.
	Chat { payload: String, text: String },
	/// Encoded notice or event, fanned out without history.
	Broadcast { payload: String },
	Ledger { op: LedgerOp },
	Poll { op: PollOp },
}

#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("encode bridge frame: {0}")]
	Encode(#[from] serde_json::Error),

	#[error("redis: {0}")]
	Redis(#[from] redis::RedisError),
}

/// Receiving end of a room topic. Dropping it ends the subscription.
#[derive(Debug)]
pub struct BridgeSubscription {
	rx: mpsc::Receiver<Arc<BridgeFrame>>,
	task: JoinHandle<()>,
}

impl BridgeSubscription {
	pub async fn recv(&mut self) -> Option<Arc<BridgeFrame>> {
		self.rx.recv().await
	}
}

impl Drop for BridgeSubscription {
	fn drop(&mut self) {
		self.task.abort();
	}
}

/// Room-scoped publish/subscribe used to share one logical room across processes.
#[async_trait]
pub trait PubSubBridge: Send + Sync + 'static {
	fn process_id(&self) -> &str;

	fn topic_prefix(&self) -> &str;

	fn topic(&self, room: &RoomId) -> String {
		format!("{}{}", self.topic_prefix(), room.as_str())
	}

	async fn publish_frame(&self, room: &RoomId, frame: BridgeFrame) -> Result<(), BridgeError>;

	async fn subscribe(&self, room: &RoomId) -> Result<BridgeSubscription, BridgeError>;

	async fn publish(&self, room: &RoomId, body: BridgeBody) -> Result<(), BridgeError> {
		let frame = BridgeFrame {
			origin: self.process_id().to_string(),
			body,
		};
		self.publish_frame(room, frame).await
	}
}

fn new_process_id() -> String {
	uuid::Uuid::new_v4().simple().to_string()
}

/// Single-process bridge over `tokio::sync::broadcast` topics.
#[derive(Debug)]
pub struct LocalBridge {
	process_id: String,
	prefix: String,
	capacity: usize,
	topics: Mutex<HashMap<String, broadcast::Sender<Arc<BridgeFrame>>>>,
}

impl LocalBridge {
	pub fn new(prefix: impl Into<String>, capacity: usize) -> Self {
		Self {
			process_id: new_process_id(),
			prefix: prefix.into(),
			capacity: capacity.max(1),
			topics: Mutex::new(HashMap::new()),
		}
	}
}

impl Default for LocalBridge {
	fn default() -> Self {
		Self::new(DEFAULT_TOPIC_PREFIX, 1024)
	}
}

#[async_trait]
impl PubSubBridge for LocalBridge {
	fn process_id(&self) -> &str {
		&self.process_id
	}

	fn topic_prefix(&self) -> &str {
		&self.prefix
	}

	async fn publish_frame(&self, room: &RoomId, frame: BridgeFrame) -> Result<(), BridgeError> {
		let topic = self.topic(room);
		let mut topics = self.topics.lock().await;
		let Some(tx) = topics.get(&topic) else {
			return Ok(());
		};

		if tx.send(Arc::new(frame)).is_err() {
			topics.remove(&topic);
			debug!(%topic, "local bridge: topic pruned (no subscribers)");
		}
		Ok(())
	}

	async fn subscribe(&self, room: &RoomId) -> Result<BridgeSubscription, BridgeError> {
		let topic = self.topic(room);
		let mut source = {
			let mut topics = self.topics.lock().await;
			topics
				.entry(topic.clone())
				.or_insert_with(|| broadcast::channel(self.capacity).0)
				.subscribe()
		};

		let (tx, rx) = mpsc::channel(self.capacity);
		let task = tokio::spawn(async move {
			loop {
				match source.recv().await {
					Ok(frame) => {
						if tx.send(frame).await.is_err() {
							break;
						}
					}
					Err(broadcast::error::RecvError::Lagged(dropped)) => {
						metrics::counter!("chatroom_server_bridge_lagged_total").increment(dropped);
						warn!(%topic, dropped, "local bridge: subscriber lagged");
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		});

		Ok(BridgeSubscription { rx, task })
	}
}

/// Multi-process bridge over Redis `PUBLISH`/`SUBSCRIBE`.
#[derive(Clone)]
pub struct RedisBridge {
	process_id: String,
	prefix: String,
	capacity: usize,
	client: redis::Client,
	publisher: redis::aio::ConnectionManager,
}

impl RedisBridge {
	pub async fn connect(url: &str, prefix: impl Into<String>, capacity: usize) -> anyhow::Result<Self> {
		let client = redis::Client::open(url).context("open redis client")?;
		let publisher = redis::aio::ConnectionManager::new(client.clone())
			.await
			.context("connect redis publisher")?;

		Ok(Self {
			process_id: new_process_id(),
			prefix: prefix.into(),
			capacity: capacity.max(1),
			client,
			publisher,
		})
	}
}

#[async_trait]
impl PubSubBridge for RedisBridge {
	fn process_id(&self) -> &str {
		&self.process_id
	}

	fn topic_prefix(&self) -> &str {
		&self.prefix
	}

	async fn publish_frame(&self, room: &RoomId, frame: BridgeFrame) -> Result<(), BridgeError> {
		let payload = serde_json::to_string(&frame)?;
		let mut conn = self.publisher.clone();
		let _: () = conn.publish(self.topic(room), payload).await?;
		Ok(())
	}

	async fn subscribe(&self, room: &RoomId) -> Result<BridgeSubscription, BridgeError> {
		let topic = self.topic(room);
		let mut pubsub = self.client.get_async_pubsub().await?;
		pubsub.subscribe(&topic).await?;

		let (tx, rx) = mpsc::channel(self.capacity);
		let task = tokio::spawn(async move {
			let mut messages = pubsub.into_on_message();
			while let Some(msg) = messages.next().await {
				let frame = match serde_json::from_slice::<BridgeFrame>(msg.get_payload_bytes()) {
					Ok(frame) => frame,
					Err(e) => {
						metrics::counter!("chatroom_server_bridge_errors_total").increment(1);
						warn!(%topic, error = %e, "redis bridge: dropping undecodable frame");
						continue;
					}
				};
				if tx.send(Arc::new(frame)).await.is_err() {
					break;
				}
			}
			debug!(%topic, "redis bridge: subscription ended");
		});

		Ok(BridgeSubscription { rx, task })
	}
}
