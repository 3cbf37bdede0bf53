#![forbid(unsafe_code)]

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chatroom_domain::{EventId, Identity, IdentityKey, RoomId, UserId, format_duration};
use chatroom_protocol::{
	ChatMessage, ClientPayload, EventResponse, ServerMessage, ServerPayload, code, encode_payload, role_badges,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::server::audit::{AuditService, ModerationRecord};
use crate::server::bridge::{BridgeBody, BridgeError, BridgeFrame, BridgeSubscription, PubSubBridge};
use crate::server::commands::Command;
use crate::server::embeds::EmbedAggregateCache;
use crate::server::history::{DEFAULT_HISTORY_CAPACITY, HistoryBuffer};
use crate::server::ledger::{LedgerOp, ModerationLedger};
use crate::server::poll::{EVENT_CLOSE, EVENT_POLL, Poll, PollOp};
use crate::server::registry::{ConnHandle, ConnectionRegistry, Delivery, RegistryCounts};

pub const REQUEST_EMBEDS: &str = "embeds";
pub const REQUEST_VIEWERS: &str = "viewers";

/// Extra time a replicated poll waits for its owner's close before dropping itself.
const REPLICA_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Per-room tuning shared by every room actor.
#[derive(Debug, Clone)]
pub struct RoomConfig {
	/// Chat payloads kept for the join-time `MessageQueue`.
	pub history_capacity: usize,
	/// Identities served between scheduler yields during fan-out.
	pub dispatch_batch_size: usize,
	pub embed_cache_ttl: Duration,
	/// Grace period before an idle room is torn down.
	pub idle_timeout: Duration,
	pub mailbox_capacity: usize,
}

impl Default for RoomConfig {
	fn default() -> Self {
		Self {
			history_capacity: DEFAULT_HISTORY_CAPACITY,
			dispatch_batch_size: 64,
			embed_cache_ttl: crate::server::embeds::DEFAULT_EMBED_TTL,
			idle_timeout: Duration::from_secs(60),
			mailbox_capacity: 1024,
		}
	}
}

/// Collaborators every room actor needs.
#[derive(Clone)]
pub struct RoomContext {
	pub bridge: Arc<dyn PubSubBridge>,
	pub audit: AuditService,
	pub config: RoomConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
	Joined,
	/// `None` means an indefinite ban.
	Banned {
		remaining: Option<Duration>,
	},
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
	pub room: String,
	pub connections: usize,
	pub identities: usize,
	pub anonymous: usize,
	pub history: usize,
	pub poll_active: bool,
}

#[derive(Debug)]
pub enum RoomCommand {
	Join {
		identity: Identity,
		conn: ConnHandle,
		reply: oneshot::Sender<JoinOutcome>,
	},
	Leave {
		key: IdentityKey,
		conn_id: u64,
	},
	Payload {
		identity: Identity,
		origin: ConnHandle,
		payload: ClientPayload,
	},
	ClosePoll {
		id: EventId,
	},
	Stats {
		reply: oneshot::Sender<RoomStats>,
	},
}

/// Mailbox of a running room actor.
#[derive(Debug, Clone)]
pub struct RoomHandle {
	room: RoomId,
	tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
	pub fn room(&self) -> &RoomId {
		&self.room
	}

	pub async fn send(&self, cmd: RoomCommand) -> Result<(), mpsc::error::SendError<RoomCommand>> {
		self.tx.send(cmd).await
	}

	/// True once the actor has shut down.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// Subscribe the room topic and start its actor.
pub async fn spawn_room(room: RoomId, ctx: RoomContext) -> Result<RoomHandle, BridgeError> {
	let subscription = ctx.bridge.subscribe(&room).await?;
	let (tx, rx) = mpsc::channel(ctx.config.mailbox_capacity.max(1));

	let actor = Room {
		id: room.clone(),
		registry: ConnectionRegistry::new(),
		ledger: ModerationLedger::new(),
		history: HistoryBuffer::new(ctx.config.history_capacity),
		poll: None,
		embeds: EmbedAggregateCache::new(ctx.config.embed_cache_ttl),
		self_tx: tx.downgrade(),
		bridge: ctx.bridge,
		audit: ctx.audit,
		config: ctx.config,
	};

	tokio::spawn(actor.run(rx, subscription));
	Ok(RoomHandle { room, tx })
}

struct Room {
	id: RoomId,
	bridge: Arc<dyn PubSubBridge>,
	audit: AuditService,
	config: RoomConfig,

	registry: ConnectionRegistry,
	ledger: ModerationLedger,
	history: HistoryBuffer,
	poll: Option<Poll>,
	embeds: EmbedAggregateCache,

	self_tx: mpsc::WeakSender<RoomCommand>,
}

fn encode(payload: &ServerPayload) -> Option<Arc<str>> {
	match encode_payload(payload) {
		Ok(s) => Some(Arc::from(s)),
		Err(e) => {
			warn!(error = %e, kind = payload.kind(), "failed to encode server payload");
			None
		}
	}
}

fn send_to(conn: &ConnHandle, payload: &ServerPayload) {
	if let Some(raw) = encode(payload) {
		let _ = conn.send_text(raw);
	}
}

fn banned_notice(remaining: Option<Duration>) -> ServerPayload {
	let message = match remaining {
		Some(d) => format!("You are banned from this chat for {}", format_duration(d)),
		None => "You are permanently banned from this chat".to_string(),
	};
	ServerPayload::ServerMessage(ServerMessage::new(message, code::BANNED).with_status("banned"))
}

impl Room {
	async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>, mut subscription: BridgeSubscription) {
		metrics::gauge!("chatroom_server_active_rooms").increment(1.0);
		info!(room = %self.id, "room started");

		let mut idle_deadline: Option<Instant> = None;

		loop {
			let idle = async move {
				match idle_deadline {
					Some(at) => sleep_until(at).await,
					None => std::future::pending().await,
				}
			};

			tokio::select! {
				biased;

				cmd = rx.recv() => match cmd {
					Some(cmd) => self.handle_command(cmd).await,
					None => break,
				},

				frame = subscription.recv() => match frame {
					Some(frame) => self.handle_frame(&frame).await,
					None => {
						warn!(room = %self.id, "bridge subscription ended; closing room");
						for entry in self.registry.snapshot() {
							for conn in self.registry.unregister_identity(&entry.identity.key()) {
								conn.close();
							}
						}
						break;
					}
				},

				_ = idle => {
					if self.is_idle() {
						debug!(room = %self.id, "room idle; tearing down");
						break;
					}
				}
			}

			// Live sanctions alone keep the room up; the deadline re-arms so their expiry is noticed.
			idle_deadline = if self.registry.is_empty() && self.poll.is_none() {
				let now = Instant::now();
				Some(
					idle_deadline
						.filter(|at| *at > now)
						.unwrap_or(now + self.config.idle_timeout),
				)
			} else {
				None
			};
		}

		rx.close();
		// Dropping the poll aborts its close timer.
		self.poll = None;
		metrics::gauge!("chatroom_server_active_rooms").decrement(1.0);
		info!(room = %self.id, "room stopped");
	}

	fn is_idle(&mut self) -> bool {
		self.registry.is_empty() && self.poll.is_none() && !self.ledger.has_live_entries()
	}

	async fn handle_command(&mut self, cmd: RoomCommand) {
		match cmd {
			RoomCommand::Join { identity, conn, reply } => {
				let outcome = self.join(identity, conn);
				let _ = reply.send(outcome);
			}
			RoomCommand::Leave { key, conn_id } => {
				if self.registry.unregister(&key, conn_id).is_some() {
					debug!(room = %self.id, identity = %key, conn_id, "connection left");
				}
			}
			RoomCommand::Payload {
				identity,
				origin,
				payload,
			} => self.handle_payload(&identity, &origin, payload).await,
			RoomCommand::ClosePoll { id } => self.close_poll(id).await,
			RoomCommand::Stats { reply } => {
				let _ = reply.send(self.stats());
			}
		}
	}

	fn join(&mut self, identity: Identity, conn: ConnHandle) -> JoinOutcome {
		if let Some(remaining) = self.ban_for(&identity, conn.remote_ip) {
			metrics::counter!("chatroom_server_join_rejections_total", "reason" => "banned").increment(1);
			info!(room = %self.id, identity = %identity.key(), conn_id = conn.id, "join rejected: banned");
			send_to(&conn, &banned_notice(remaining));
			return JoinOutcome::Banned { remaining };
		}

		self.registry.register(&identity, conn.clone());

		let greeting = if identity.is_anonymous() {
			metrics::counter!("chatroom_server_joins_total", "kind" => "anonymous").increment(1);
			ServerMessage::new("Connected anonymously; sign in to chat", code::CONNECTED_ANONYMOUS)
		} else {
			metrics::counter!("chatroom_server_joins_total", "kind" => "authenticated").increment(1);
			ServerMessage::new(format!("Connected as {}", identity.display_name), code::CONNECTED)
		};
		send_to(&conn, &ServerPayload::ServerMessage(greeting.with_status("connected")));

		let history = self.history.snapshot();
		send_to(&conn, &ServerPayload::message_queue(history.iter().map(|raw| &**raw)));

		debug!(room = %self.id, identity = %identity.key(), conn_id = conn.id, "connection joined");
		JoinOutcome::Joined
	}

	/// `Some(remaining)` when the identity or its address may not join.
	fn ban_for(&mut self, identity: &Identity, ip: Option<IpAddr>) -> Option<Option<Duration>> {
		if identity.status.is_banned() {
			return Some(None);
		}
		if let Some(id) = identity.id.as_ref()
			&& let Some(left) = self.ledger.is_banned(id)
		{
			return Some(Some(left));
		}
		if let Some(ip) = ip
			&& let Some(left) = self.ledger.is_ip_banned(ip)
		{
			return Some(Some(left));
		}
		None
	}

	async fn handle_payload(&mut self, identity: &Identity, origin: &ConnHandle, payload: ClientPayload) {
		if let Some(message) = payload.message {
			self.handle_chat(identity, message).await;
		}
		if let Some(command) = payload.command {
			self.handle_chat_command(identity, origin, &command).await;
		}
		if let Some(request) = payload.request {
			self.handle_request(origin, &request);
		}
		if let Some(event) = payload.event {
			self.handle_event(identity, &event).await;
		}
	}

	async fn handle_chat(&mut self, identity: &Identity, message: String) {
		let Some(user) = identity.id.as_ref() else {
			debug!(room = %self.id, "dropping chat from anonymous identity");
			return;
		};

		if identity.status.is_muted() || self.ledger.is_muted(user).is_some() {
			metrics::counter!("chatroom_server_messages_dropped_total", "reason" => "muted").increment(1);
			return;
		}
		if let Some(left) = self.ledger.is_banned(user) {
			metrics::counter!("chatroom_server_messages_dropped_total", "reason" => "banned").increment(1);
			self.evict_user(user, Some(left));
			return;
		}

		let text = message.trim();
		if text.is_empty() {
			return;
		}
		if let Some(phrase) = self.ledger.blocked_phrase(text) {
			metrics::counter!("chatroom_server_messages_dropped_total", "reason" => "phrase").increment(1);
			debug!(room = %self.id, identity = %user, %phrase, "dropping chat containing blocked phrase");
			return;
		}

		let chat = ServerPayload::ChatMessage(ChatMessage {
			username: identity.display_name.clone(),
			message: text.to_string(),
			roles: role_badges(identity.roles),
		});
		let payload = match encode_payload(&chat) {
			Ok(p) => p,
			Err(e) => {
				warn!(room = %self.id, error = %e, "failed to encode chat message");
				return;
			}
		};

		metrics::counter!("chatroom_server_messages_published_total").increment(1);
		self.publish(BridgeBody::Chat {
			payload,
			text: text.to_string(),
		})
		.await;
	}

	async fn handle_chat_command(&mut self, identity: &Identity, origin: &ConnHandle, raw: &str) {
		if !identity.is_privileged() {
			debug!(room = %self.id, identity = %identity.key(), "ignoring command from unprivileged identity");
			return;
		}

		let cmd = match Command::parse(raw) {
			Ok(cmd) => cmd,
			Err(e) => {
				debug!(room = %self.id, error = ?e, "invalid command");
				send_to(origin, &ServerPayload::error(e.to_string()));
				return;
			}
		};

		metrics::counter!("chatroom_server_commands_total", "kind" => cmd.kind()).increment(1);
		let kind = cmd.kind();

		match cmd {
			Command::Poll {
				duration,
				title,
				options,
			} => self.open_poll(identity, origin, duration, title, options).await,

			Command::Ban {
				target,
				duration,
				reason,
			} => {
				let Some(target) = self.registry.find_user(&target).cloned() else {
					send_to(origin, &ServerPayload::error("User not found"));
					return;
				};
				let Some(user) = target.id.clone() else {
					return;
				};
				self.commit(LedgerOp::Ban {
					user: user.clone(),
					name: target.display_name.clone(),
					duration_ms: duration.as_millis() as u64,
				})
				.await;
				self.notice(format!(
					"{} has been banned for {}. Reason: {reason}",
					target.display_name,
					format_duration(duration)
				))
				.await;
				self.record(identity, kind, Some(user.to_string()), Some(duration), Some(reason));
			}

			Command::IpBan {
				target,
				duration,
				reason,
			} => {
				let Some(target) = self.registry.find_user(&target).cloned() else {
					send_to(origin, &ServerPayload::error("User not found"));
					return;
				};
				let Some(user) = target.id.clone() else {
					return;
				};
				let mut ips: Vec<IpAddr> = self
					.registry
					.connections_for(&target.key())
					.iter()
					.filter_map(|c| c.remote_ip)
					.collect();
				ips.sort();
				ips.dedup();

				let duration_ms = duration.as_millis() as u64;
				self.commit(LedgerOp::Ban {
					user: user.clone(),
					name: target.display_name.clone(),
					duration_ms,
				})
				.await;
				for ip in ips {
					self.commit(LedgerOp::BanIp { ip, duration_ms }).await;
				}
				self.notice(format!(
					"{} has been IP banned for {}. Reason: {reason}",
					target.display_name,
					format_duration(duration)
				))
				.await;
				self.record(identity, kind, Some(user.to_string()), Some(duration), Some(reason));
			}

			Command::Timeout {
				target,
				duration,
				reason,
			} => {
				let Some(target) = self.registry.find_user(&target).cloned() else {
					send_to(origin, &ServerPayload::error("User not found"));
					return;
				};
				let Some(user) = target.id.clone() else {
					return;
				};
				self.commit(LedgerOp::Mute {
					user: user.clone(),
					name: target.display_name.clone(),
					duration_ms: duration.as_millis() as u64,
				})
				.await;
				self.notice(format!(
					"{} has been timed out for {}. Reason: {reason}",
					target.display_name,
					format_duration(duration)
				))
				.await;
				self.record(identity, kind, Some(user.to_string()), Some(duration), Some(reason));
			}

			Command::Nuke { phrase, duration } => {
				self.commit(LedgerOp::BanPhrase {
					phrase: phrase.clone(),
					duration_ms: duration.map(|d| d.as_millis() as u64),
				})
				.await;
				let message = match duration {
					Some(d) => format!("\"{phrase}\" has been nuked for {}", format_duration(d)),
					None => format!("\"{phrase}\" has been nuked"),
				};
				self.notice(message).await;
				self.record(identity, kind, Some(phrase), duration, None);
			}

			Command::Unban { target } => {
				let Some(user) = self.resolve_sanction_target(&target) else {
					send_to(origin, &ServerPayload::error("User not found"));
					return;
				};
				if self.ledger.is_banned(&user).is_none() {
					send_to(origin, &ServerPayload::error("User is not banned"));
					return;
				}
				self.commit(LedgerOp::ClearBan { user: user.clone() }).await;
				self.notice(format!("{target} has been unbanned")).await;
				self.record(identity, kind, Some(user.to_string()), None, None);
			}

			Command::Untimeout { target } => {
				let Some(user) = self.resolve_sanction_target(&target) else {
					send_to(origin, &ServerPayload::error("User not found"));
					return;
				};
				if self.ledger.is_muted(&user).is_none() {
					send_to(origin, &ServerPayload::error("User is not timed out"));
					return;
				}
				self.commit(LedgerOp::ClearMute { user: user.clone() }).await;
				self.notice(format!("{target} is no longer timed out")).await;
				self.record(identity, kind, Some(user.to_string()), None, None);
			}

			Command::Unnuke { phrase } => {
				if !self.ledger.is_phrase_blocked(&phrase) {
					send_to(origin, &ServerPayload::error("Phrase is not blocked"));
					return;
				}
				self.commit(LedgerOp::ClearPhrase { phrase: phrase.clone() }).await;
				self.notice(format!("\"{phrase}\" is no longer blocked")).await;
				self.record(identity, kind, Some(phrase), None, None);
			}
		}
	}

	/// Target of a clear command: a connected user, else one the ledger still knows.
	fn resolve_sanction_target(&self, target: &str) -> Option<UserId> {
		self.registry
			.find_user(target)
			.and_then(|identity| identity.id.clone())
			.or_else(|| self.ledger.find_sanctioned(target.trim().trim_start_matches('@')))
	}

	async fn open_poll(
		&mut self,
		identity: &Identity,
		origin: &ConnHandle,
		duration: Duration,
		title: String,
		options: Vec<String>,
	) {
		if self.poll.is_some() {
			send_to(origin, &ServerPayload::error("A poll is already active"));
			return;
		}

		let mut poll = Poll::new(identity.display_name.clone(), title, options, duration);
		self.arm_close_timer(&mut poll, duration);

		info!(room = %self.id, poll = %poll.id, options = poll.options.len(), "poll opened");
		let announce = ServerPayload::event(EVENT_POLL, poll.open_data());
		let op = poll.open_op();
		self.poll = Some(poll);
		self.publish(BridgeBody::Poll { op }).await;
		self.broadcast(&announce).await;
		self.record(identity, "poll", None, Some(duration), None);
	}

	fn arm_close_timer(&self, poll: &mut Poll, after: Duration) {
		let Some(tx) = self.self_tx.upgrade() else {
			return;
		};
		let id = poll.id;
		poll.set_timer(tokio::spawn(async move {
			sleep(after).await;
			let _ = tx.send(RoomCommand::ClosePoll { id }).await;
		}));
	}

	async fn close_poll(&mut self, id: EventId) {
		if self.poll.as_ref().is_none_or(|p| p.id != id) {
			return;
		}
		let Some(poll) = self.poll.take() else {
			return;
		};

		if !poll.is_owned() {
			warn!(room = %self.id, poll = %poll.id, "replicated poll expired without a close from its owner");
			return;
		}

		info!(room = %self.id, poll = %poll.id, respondents = poll.respondent_count(), "poll closed");
		self.publish(BridgeBody::Poll {
			op: PollOp::Close { id: poll.id },
		})
		.await;
		self.broadcast(&ServerPayload::event(EVENT_CLOSE, poll.close_data()))
			.await;
	}

	/// Mirror another process's poll. Concurrent opens settle on the lowest event id.
	fn apply_poll(&mut self, op: &PollOp) {
		match op {
			PollOp::Open { id, .. } => {
				if let Some(current) = self.poll.as_ref()
					&& (current.id == *id || current.id.0 < id.0)
				{
					debug!(room = %self.id, kept = %current.id, incoming = %id, "ignoring concurrent poll open");
					return;
				}
				let Some(mut replica) = Poll::replica(op) else {
					return;
				};
				if let Some(replaced) = self.poll.take() {
					warn!(room = %self.id, replaced = %replaced.id, kept = %id, "concurrent poll opened elsewhere; yielding");
				}
				let after = replica.duration + REPLICA_CLOSE_GRACE;
				self.arm_close_timer(&mut replica, after);
				self.poll = Some(replica);
			}
			PollOp::Answer { id, user, option } => {
				if let Some(poll) = self.poll.as_mut()
					&& poll.id == *id
					&& let Err(rejection) = poll.respond(user, *option, None)
				{
					debug!(room = %self.id, identity = %user, ?rejection, "replicated poll answer ignored");
				}
			}
			PollOp::Close { id } => {
				if self.poll.as_ref().is_some_and(|p| p.id == *id) {
					self.poll = None;
				}
			}
		}
	}

	fn handle_request(&mut self, origin: &ConnHandle, request: &str) {
		match request.trim() {
			REQUEST_EMBEDS => {
				let registry = &self.registry;
				let embeds = self.embeds.get_or_refresh(|| registry.embed_counts());
				send_to(origin, &ServerPayload::event(REQUEST_EMBEDS, json!(embeds)));
			}
			REQUEST_VIEWERS => {
				let RegistryCounts {
					connections,
					identities,
					anonymous,
				} = self.registry.counts();
				send_to(
					origin,
					&ServerPayload::event(
						REQUEST_VIEWERS,
						json!({
							"connections": connections,
							"identities": identities,
							"anonymous": anonymous,
						}),
					),
				);
			}
			other => {
				debug!(room = %self.id, request = %other, "unknown request");
				send_to(origin, &ServerPayload::error("Invalid Request"));
			}
		}
	}

	async fn handle_event(&mut self, identity: &Identity, event: &serde_json::Value) {
		let Some(user) = identity.id.as_ref() else {
			return;
		};
		let Some(poll) = self.poll.as_mut() else {
			return;
		};
		let Some(response) = EventResponse::from_value(event) else {
			debug!(room = %self.id, "malformed event response");
			return;
		};

		if let Err(rejection) = poll.respond(user, response.option(), response.event_id()) {
			debug!(room = %self.id, identity = %user, ?rejection, "poll response ignored");
			return;
		}

		let op = PollOp::Answer {
			id: poll.id,
			user: user.clone(),
			option: response.option(),
		};
		self.publish(BridgeBody::Poll { op }).await;
	}

	async fn handle_frame(&mut self, frame: &BridgeFrame) {
		match &frame.body {
			BridgeBody::Chat { payload, text } => {
				let raw: Arc<str> = Arc::from(payload.as_str());
				self.history.push(Arc::clone(&raw), text);
				self.fan_out(raw).await;
			}
			BridgeBody::Broadcast { payload } => {
				self.fan_out(Arc::from(payload.as_str())).await;
			}
			BridgeBody::Ledger { op } => {
				if frame.origin != self.bridge.process_id() {
					debug!(room = %self.id, origin = %frame.origin, ?op, "applying replicated ledger op");
					self.apply(op);
				}
			}
			BridgeBody::Poll { op } => {
				if frame.origin != self.bridge.process_id() {
					debug!(room = %self.id, origin = %frame.origin, ?op, "applying replicated poll op");
					self.apply_poll(op);
				}
			}
		}
	}

	/// Deliver to every registered connection, evicting identities banned since the last read.
	async fn fan_out(&mut self, raw: Arc<str>) {
		let batch = self.config.dispatch_batch_size.max(1);
		let mut delivered: u64 = 0;

		for (idx, entry) in self.registry.snapshot().into_iter().enumerate() {
			if idx > 0 && idx % batch == 0 {
				tokio::task::yield_now().await;
			}

			let key = entry.identity.key();
			if let Some(user) = entry.identity.id.as_ref()
				&& let Some(left) = self.ledger.is_banned(user)
			{
				self.evict(&key, Some(left));
				continue;
			}

			for conn in &entry.conns {
				match conn.send_text(Arc::clone(&raw)) {
					Delivery::Queued => delivered += 1,
					Delivery::Full => {
						metrics::counter!("chatroom_server_slow_consumers_total").increment(1);
						warn!(room = %self.id, identity = %key, conn_id = conn.id, "send queue full; dropping connection");
						self.registry.unregister(&key, conn.id);
						conn.close();
					}
					Delivery::Closed => {
						self.registry.unregister(&key, conn.id);
					}
				}
			}
		}

		metrics::counter!("chatroom_server_fanout_deliveries_total").increment(delivered);
	}

	/// Apply locally, then replicate to other processes.
	async fn commit(&mut self, op: LedgerOp) {
		self.apply(&op);
		self.publish(BridgeBody::Ledger { op }).await;
	}

	fn apply(&mut self, op: &LedgerOp) {
		self.ledger.apply(op);

		match op {
			LedgerOp::Ban { user, duration_ms, .. } => {
				metrics::counter!("chatroom_server_bans_total").increment(1);
				self.evict_user(user, Some(Duration::from_millis(*duration_ms)));
			}
			LedgerOp::BanIp { ip, duration_ms } => {
				metrics::counter!("chatroom_server_bans_total").increment(1);
				self.evict_ip(*ip, Duration::from_millis(*duration_ms));
			}
			LedgerOp::BanPhrase { phrase, .. } => {
				let purged = self.history.purge_phrase(phrase);
				if purged > 0 {
					debug!(room = %self.id, purged, "purged nuked phrase from history");
				}
			}
			LedgerOp::Mute { .. } | LedgerOp::ClearBan { .. } | LedgerOp::ClearMute { .. } | LedgerOp::ClearPhrase { .. } => {}
		}
	}

	fn evict_user(&mut self, user: &UserId, remaining: Option<Duration>) {
		self.evict(&IdentityKey::User(user.clone()), remaining);
	}

	fn evict(&mut self, key: &IdentityKey, remaining: Option<Duration>) {
		let conns = self.registry.unregister_identity(key);
		if conns.is_empty() {
			return;
		}
		info!(room = %self.id, identity = %key, connections = conns.len(), "disconnecting banned identity");
		let notice = banned_notice(remaining);
		for conn in conns {
			send_to(&conn, &notice);
			conn.close();
		}
	}

	fn evict_ip(&mut self, ip: IpAddr, remaining: Duration) {
		let notice = banned_notice(Some(remaining));
		for entry in self.registry.snapshot() {
			let key = entry.identity.key();
			for conn in entry.conns.iter().filter(|c| c.remote_ip == Some(ip)) {
				self.registry.unregister(&key, conn.id);
				send_to(conn, &notice);
				conn.close();
			}
		}
	}

	async fn notice(&self, message: String) {
		self.broadcast(&ServerPayload::notice(message)).await;
	}

	async fn broadcast(&self, payload: &ServerPayload) {
		match encode_payload(payload) {
			Ok(payload) => self.publish(BridgeBody::Broadcast { payload }).await,
			Err(e) => warn!(room = %self.id, error = %e, "failed to encode broadcast"),
		}
	}

	async fn publish(&self, body: BridgeBody) {
		if let Err(e) = self.bridge.publish(&self.id, body).await {
			metrics::counter!("chatroom_server_bridge_errors_total").increment(1);
			warn!(room = %self.id, error = %e, "bridge publish failed");
		}
	}

	fn record(
		&self,
		actor: &Identity,
		action: &'static str,
		target: Option<String>,
		duration: Option<Duration>,
		reason: Option<String>,
	) {
		if !self.audit.is_enabled() {
			return;
		}

		let rec = ModerationRecord {
			room: self.id.to_string(),
			actor_id: actor.id.as_ref().map(|id| id.to_string()),
			actor_name: actor.display_name.clone(),
			action,
			target,
			duration_ms: duration.map(|d| d.as_millis() as i64),
			reason,
		};
		let audit = self.audit.clone();
		tokio::spawn(async move {
			if let Err(e) = audit.record(&rec).await {
				warn!(error = %e, action = rec.action, "moderation audit write failed");
			}
		});
	}

	fn stats(&self) -> RoomStats {
		let counts = self.registry.counts();
		RoomStats {
			room: self.id.to_string(),
			connections: counts.connections,
			identities: counts.identities,
			anonymous: counts.anonymous,
			history: self.history.len(),
			poll_active: self.poll.is_some(),
		}
	}
}
