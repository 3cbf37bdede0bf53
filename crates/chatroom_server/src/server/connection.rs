#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chatroom_domain::Identity;
use chatroom_protocol::{
	ClientFrame, DEFAULT_MAX_FRAME_SIZE, PING, PONG, ProtocolError, ServerPayload, decode_frame, decode_join,
	decode_payload, encode_payload,
};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, COOKIE, HeaderName};
use tracing::{debug, info, warn};

use crate::server::auth::{Handshake, SessionResolver};
use crate::server::directory::RoomDirectory;
use crate::server::registry::{ConnHandle, Outbound};
use crate::server::room::{JoinOutcome, RoomCommand, RoomHandle};
use crate::server::rooms::RoomManager;

/// Frames the writer coalesces before flushing.
const WRITE_BATCH: usize = 64;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub heartbeat_interval: Duration,
	pub max_frame_bytes: usize,
	/// Frames queued for the writer before the connection counts as too slow.
	pub send_queue_capacity: usize,
	/// How long a connection may stay unbound before it is closed.
	pub join_timeout: Duration,
	/// How long the writer may take to flush and close after the reader stops.
	pub close_timeout: Duration,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			heartbeat_interval: Duration::from_secs(30),
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			send_queue_capacity: 1024,
			join_timeout: Duration::from_secs(30),
			close_timeout: Duration::from_secs(5),
		}
	}
}

/// Everything a connection task needs besides its socket.
#[derive(Clone)]
pub struct ConnectionContext {
	pub rooms: RoomManager,
	pub sessions: Arc<dyn SessionResolver>,
	pub directory: Arc<dyn RoomDirectory>,
	pub settings: ConnectionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
	Connecting,
	Unbound,
	Bound,
	Closing,
	Closed,
}

fn transition(conn_id: u64, state: &mut ConnState, next: ConnState) {
	debug!(conn_id, from = ?*state, to = ?next, "connection state");
	*state = next;
}

/// Accept loop: one task per transport connection.
pub async fn serve(listener: TcpListener, ctx: ConnectionContext) -> anyhow::Result<()> {
	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = match listener.accept().await {
			Ok(v) => v,
			Err(e) => {
				warn!(error = %e, "accept failed");
				tokio::time::sleep(Duration::from_millis(50)).await;
				continue;
			}
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("chatroom_server_connections_total").increment(1);

		let ctx = ctx.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, remote, ctx).await {
				warn!(conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}

fn handshake_from_request(req: &Request) -> Handshake {
	let header = |name: HeaderName| {
		req.headers()
			.get(name)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string)
	};

	Handshake {
		cookie: header(COOKIE),
		authorization: header(AUTHORIZATION),
		query: req.uri().query().map(str::to_string),
	}
}

fn reply(conn: &ConnHandle, payload: &ServerPayload) {
	match encode_payload(payload) {
		Ok(text) => {
			let _ = conn.send_text(Arc::from(text));
		}
		Err(e) => warn!(error = %e, "failed to encode reply"),
	}
}

enum JoinStep {
	Stay,
	Bound(RoomHandle, ConnHandle),
	Close,
}

pub async fn handle_connection(
	conn_id: u64,
	stream: TcpStream,
	remote: SocketAddr,
	ctx: ConnectionContext,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("chatroom_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("chatroom_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let mut state = ConnState::Connecting;
	let _ = stream.set_nodelay(true);

	let mut handshake = Handshake::default();
	let ws = tokio_tungstenite::accept_hdr_async(
		stream,
		|req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
			handshake = handshake_from_request(req);
			Ok(resp)
		},
	)
	.await
	.context("websocket handshake")?;

	let identity = ctx.sessions.resolve(&handshake).await.unwrap_or_else(Identity::anonymous);
	info!(conn_id, remote = %remote, identity = %identity.key(), "accepted connection");
	transition(conn_id, &mut state, ConnState::Unbound);

	let (mut sink, mut source) = ws.split();
	let (tx, mut rx) = mpsc::channel::<Outbound>(ctx.settings.send_queue_capacity.max(1));
	let conn_handle = ConnHandle::new(conn_id, Some(remote.ip()), None, tx.clone());

	let mut writer = tokio::spawn(async move {
		'outer: while let Some(out) = rx.recv().await {
			let mut next = Some(out);
			let mut fed = 0usize;
			while let Some(out) = next.take() {
				match out {
					Outbound::Text(text) => {
						if sink.feed(Message::text(text.to_string())).await.is_err() {
							break 'outer;
						}
					}
					Outbound::Close => {
						let _ = sink.send(Message::Close(None)).await;
						break 'outer;
					}
				}
				fed += 1;
				if fed < WRITE_BATCH {
					next = rx.try_recv().ok();
				}
			}
			if sink.flush().await.is_err() {
				break;
			}
		}
		let _ = sink.close().await;
	});
	let mut writer_done = false;

	let period = ctx.settings.heartbeat_interval.max(Duration::from_millis(10));
	let mut heartbeat = interval_at(Instant::now() + period, period);
	heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let mut awaiting_pong = false;
	let mut last_heartbeat = Instant::now();

	let mut bound: Option<(RoomHandle, ConnHandle)> = None;
	let join_deadline = Instant::now() + ctx.settings.join_timeout;

	loop {
		tokio::select! {
			msg = source.next() => {
				let msg = match msg {
					Some(Ok(msg)) => msg,
					Some(Err(e)) => {
						debug!(conn_id, error = %e, "transport error");
						break;
					}
					None => break,
				};

				let text = match msg {
					Message::Text(text) => text,
					Message::Close(_) => break,
					Message::Binary(_) => {
						debug!(conn_id, "ignoring binary frame");
						continue;
					}
					Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
				};

				let frame = match decode_frame(text.as_str(), ctx.settings.max_frame_bytes) {
					Ok(frame) => frame,
					Err(e) => {
						metrics::counter!("chatroom_server_decode_errors_total").increment(1);
						warn!(conn_id, error = %e, "dropping client frame");
						continue;
					}
				};

				match frame {
					ClientFrame::Ping => {
						let _ = conn_handle.send_text(Arc::from(PONG));
					}
					ClientFrame::Pong => {
						awaiting_pong = false;
						last_heartbeat = Instant::now();
					}
					ClientFrame::Json(json) => {
						let Some((handle, conn)) = bound.as_ref() else {
							match try_join(conn_id, json, &identity, &conn_handle, &ctx).await {
								JoinStep::Stay => {}
								JoinStep::Bound(handle, conn) => {
									transition(conn_id, &mut state, ConnState::Bound);
									heartbeat.reset();
									last_heartbeat = Instant::now();
									bound = Some((handle, conn));
								}
								JoinStep::Close => break,
							}
							continue;
						};

						let payload = match decode_payload(json) {
							Ok(p) => p,
							Err(e) => {
								metrics::counter!("chatroom_server_decode_errors_total").increment(1);
								warn!(conn_id, error = %e, "dropping malformed payload");
								continue;
							}
						};
						if payload.is_empty() {
							continue;
						}

						let cmd = RoomCommand::Payload {
							identity: identity.clone(),
							origin: conn.clone(),
							payload,
						};
						if handle.send(cmd).await.is_err() {
							warn!(conn_id, room = %handle.room(), "room closed under a bound connection");
							break;
						}
					},
				}
			}

			_ = heartbeat.tick(), if bound.is_some() => {
				if awaiting_pong {
					metrics::counter!("chatroom_server_heartbeat_timeouts_total").increment(1);
					info!(
						conn_id,
						since_ms = last_heartbeat.elapsed().as_millis() as u64,
						"heartbeat timed out"
					);
					break;
				}
				awaiting_pong = true;
				let _ = conn_handle.send_text(Arc::from(PING));
			}

			_ = sleep_until(join_deadline), if bound.is_none() => {
				metrics::counter!("chatroom_server_join_rejections_total", "reason" => "join_timeout").increment(1);
				info!(conn_id, "no room joined before the deadline");
				break;
			}

			_ = conn_handle.closed() => {
				debug!(conn_id, "closed by room");
				break;
			}

			_ = &mut writer => {
				writer_done = true;
				break;
			}
		}
	}

	transition(conn_id, &mut state, ConnState::Closing);

	if let Some((handle, _conn)) = bound.take() {
		let _ = handle
			.send(RoomCommand::Leave {
				key: identity.key(),
				conn_id,
			})
			.await;
	}

	let _ = tx.try_send(Outbound::Close);
	drop(tx);
	drop(conn_handle);
	if !writer_done && timeout(ctx.settings.close_timeout, &mut writer).await.is_err() {
		writer.abort();
	}

	transition(conn_id, &mut state, ConnState::Closed);
	info!(conn_id, "connection closed");
	Ok(())
}

async fn try_join(
	conn_id: u64,
	json: &str,
	identity: &Identity,
	own: &ConnHandle,
	ctx: &ConnectionContext,
) -> JoinStep {
	let reject = |reason: &'static str, message: &str| {
		metrics::counter!("chatroom_server_join_rejections_total", "reason" => reason).increment(1);
		debug!(conn_id, reason, "join rejected");
		reply(own, &ServerPayload::error(message));
		JoinStep::Stay
	};

	let request = match decode_join(json) {
		Ok(r) => r,
		Err(_) => return reject("malformed", "Invalid join payload"),
	};

	let room = match request.room_id() {
		Ok(room) => room,
		Err(ProtocolError::MissingRoom) => return reject("missing_room", "Missing room"),
		Err(_) => return reject("invalid_room", "Invalid room"),
	};

	if !ctx.directory.room_exists(&room).await {
		return reject("unknown_room", "Room not found");
	}

	let conn = own.clone().with_embed(request.embed_source());
	match ctx.rooms.join(&room, identity, &conn).await {
		Ok((handle, JoinOutcome::Joined)) => {
			info!(conn_id, %room, identity = %identity.key(), "joined room");
			JoinStep::Bound(handle, conn)
		}
		Ok((_, JoinOutcome::Banned { .. })) => JoinStep::Close,
		Err(e) => {
			warn!(conn_id, %room, error = %e, "join failed");
			reject("unavailable", "Room unavailable")
		}
	}
}
