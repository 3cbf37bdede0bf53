#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use chatroom_domain::{Identity, IdentityKey};
use tokio::sync::{Notify, mpsc};

/// Frames queued to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
	Text(Arc<str>),
	Close,
}

/// Result of queueing a frame on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
	Queued,
	/// The writer is not keeping up; the queue is at capacity.
	Full,
	/// The writer is gone.
	Closed,
}

/// Room-side handle to one live transport connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
	pub id: u64,
	pub remote_ip: Option<IpAddr>,
	pub embed: Option<String>,
	tx: mpsc::Sender<Outbound>,
	close_signal: Arc<Notify>,
}

impl ConnHandle {
	pub fn new(id: u64, remote_ip: Option<IpAddr>, embed: Option<String>, tx: mpsc::Sender<Outbound>) -> Self {
		Self {
			id,
			remote_ip,
			embed,
			tx,
			close_signal: Arc::new(Notify::new()),
		}
	}

	pub fn with_embed(mut self, embed: Option<String>) -> Self {
		self.embed = embed;
		self
	}

	/// Queue a text frame without waiting for room in the queue.
	pub fn send_text(&self, text: Arc<str>) -> Delivery {
		match self.tx.try_send(Outbound::Text(text)) {
			Ok(()) => Delivery::Queued,
			Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
			Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
		}
	}

	/// Ask the connection to close. The signal gets through even when the queue is full.
	pub fn close(&self) {
		let _ = self.tx.try_send(Outbound::Close);
		self.close_signal.notify_one();
	}

	/// Resolves once `close` has been called on any clone of this handle.
	pub async fn closed(&self) {
		self.close_signal.notified().await;
	}
}

#[derive(Debug)]
struct IdentityEntry {
	identity: Identity,
	conns: BTreeMap<u64, ConnHandle>,
}

/// Snapshot of one identity and its connections, detached from the registry.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
	pub identity: Identity,
	pub conns: Vec<ConnHandle>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
	pub connections: usize,
	pub identities: usize,
	pub anonymous: usize,
}

/// Identity -> live connections for one room.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
	entries: HashMap<IdentityKey, IdentityEntry>,
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Idempotent: re-registering the same connection id is a no-op.
	pub fn register(&mut self, identity: &Identity, conn: ConnHandle) {
		let entry = self.entries.entry(identity.key()).or_insert_with(|| IdentityEntry {
			identity: identity.clone(),
			conns: BTreeMap::new(),
		});
		entry.conns.entry(conn.id).or_insert(conn);
	}

	/// Remove one connection; the identity entry goes with its last connection.
	pub fn unregister(&mut self, key: &IdentityKey, conn_id: u64) -> Option<ConnHandle> {
		let entry = self.entries.get_mut(key)?;
		let removed = entry.conns.remove(&conn_id);
		if entry.conns.is_empty() {
			self.entries.remove(key);
		}
		removed
	}

	/// Remove an identity and hand back all of its connections.
	pub fn unregister_identity(&mut self, key: &IdentityKey) -> Vec<ConnHandle> {
		self.entries
			.remove(key)
			.map(|e| e.conns.into_values().collect())
			.unwrap_or_default()
	}

	pub fn connections_for(&self, key: &IdentityKey) -> Vec<ConnHandle> {
		self.entries
			.get(key)
			.map(|e| e.conns.values().cloned().collect())
			.unwrap_or_default()
	}

	/// Detached copy for iteration while the registry keeps changing.
	pub fn snapshot(&self) -> Vec<RegistryEntry> {
		self.entries
			.values()
			.map(|e| RegistryEntry {
				identity: e.identity.clone(),
				conns: e.conns.values().cloned().collect(),
			})
			.collect()
	}

	/// Resolve a command target by user id or display name (case-insensitive).
	pub fn find_user(&self, needle: &str) -> Option<&Identity> {
		let needle = needle.trim().trim_start_matches('@');
		self.entries
			.iter()
			.filter_map(|(key, e)| key.user_id().map(|id| (id, &e.identity)))
			.find(|(id, identity)| id.as_str() == needle || identity.display_name.eq_ignore_ascii_case(needle))
			.map(|(_, identity)| identity)
	}

	/// Connection count per embed source; connections without one are not counted.
	pub fn embed_counts(&self) -> BTreeMap<String, usize> {
		let mut out = BTreeMap::new();
		for conn in self.entries.values().flat_map(|e| e.conns.values()) {
			if let Some(embed) = conn.embed.as_deref() {
				*out.entry(embed.to_string()).or_insert(0) += 1;
			}
		}
		out
	}

	pub fn counts(&self) -> RegistryCounts {
		let mut counts = RegistryCounts {
			identities: self.entries.len(),
			..RegistryCounts::default()
		};
		for (key, e) in &self.entries {
			counts.connections += e.conns.len();
			if matches!(key, IdentityKey::Anonymous) {
				counts.anonymous += e.conns.len();
			}
		}
		counts
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
