#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chatroom_domain::{Role, RoleMask, RoomId, StatusMask};
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::server::audit::AuditService;
use crate::server::auth::{HmacSessionResolver, SessionClaims, sign_hmac_token};
use crate::server::bridge::LocalBridge;
use crate::server::connection::{ConnectionContext, ConnectionSettings, serve};
use crate::server::directory::StaticRooms;
use crate::server::room::{RoomConfig, RoomContext};
use crate::server::rooms::RoomManager;
use crate::util::secret::SecretString;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "smoke-secret";
const WAIT: Duration = Duration::from_secs(5);

async fn start_server(settings: ConnectionSettings) -> (SocketAddr, RoomManager) {
	let rooms = RoomManager::new(RoomContext {
		bridge: Arc::new(LocalBridge::default()),
		audit: AuditService::disabled(),
		config: RoomConfig::default(),
	});
	let ctx = ConnectionContext {
		rooms: rooms.clone(),
		sessions: Arc::new(HmacSessionResolver::new(SecretString::new(SECRET))),
		directory: Arc::new(StaticRooms::new([RoomId::new("lobby").unwrap()])),
		settings,
	};

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		let _ = serve(listener, ctx).await;
	});
	(addr, rooms)
}

fn token(sub: &str, name: &str, roles: RoleMask) -> String {
	let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 300;
	let claims = SessionClaims {
		sub: sub.to_string(),
		name: Some(name.to_string()),
		roles,
		status: StatusMask::valid(),
		exp,
	};
	sign_hmac_token(&claims, SECRET).unwrap()
}

async fn connect(addr: SocketAddr, token: Option<&str>) -> Ws {
	let mut req = format!("ws://{addr}/").into_client_request().unwrap();
	if let Some(token) = token {
		req.headers_mut()
			.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
	}
	let (ws, _resp) = tokio_tungstenite::connect_async(req).await.unwrap();
	ws
}

async fn send_text(ws: &mut Ws, text: &str) {
	ws.send(Message::text(text.to_string())).await.unwrap();
}

async fn next_text(ws: &mut Ws) -> String {
	loop {
		let msg = timeout(WAIT, ws.next())
			.await
			.expect("expected a frame within timeout")
			.expect("stream open")
			.expect("valid frame");
		match msg {
			Message::Text(text) => return text.as_str().to_string(),
			Message::Ping(_) | Message::Pong(_) => continue,
			other => panic!("expected text frame, got {other:?}"),
		}
	}
}

async fn next_json(ws: &mut Ws) -> Value {
	serde_json::from_str(&next_text(ws).await).expect("valid json")
}

async fn join(ws: &mut Ws, room: &str) -> Value {
	send_text(ws, &format!(r#"{{"room":"{room}"}}"#)).await;
	let greeting = next_json(ws).await;
	let queue = next_json(ws).await;
	assert!(queue["MessageQueue"].is_array(), "expected MessageQueue, got {queue}");
	greeting
}

#[tokio::test]
async fn websocket_join_chat_and_ping() {
	let (addr, rooms) = start_server(ConnectionSettings::default()).await;

	let alice_token = token("alice", "Alice", RoleMask::NONE);
	let mut alice_1 = connect(addr, Some(&alice_token)).await;
	let mut alice_2 = connect(addr, Some(&alice_token)).await;
	let mut anon = connect(addr, None).await;

	assert_eq!(join(&mut alice_1, "lobby").await["ServerMessage"]["message"], "Connected as Alice");
	join(&mut alice_2, "lobby").await;
	assert_eq!(join(&mut anon, "Lobby").await["ServerMessage"]["code"], 2);

	send_text(&mut anon, "ping").await;
	assert_eq!(next_text(&mut anon).await, "pong");

	send_text(&mut alice_1, r#"{"message":"hello room"}"#).await;
	for ws in [&mut alice_1, &mut alice_2, &mut anon] {
		let msg = next_json(ws).await;
		assert_eq!(msg["ChatMessage"]["username"], "Alice");
		assert_eq!(msg["ChatMessage"]["message"], "hello room");
	}

	let stats = rooms.stats().await;
	assert_eq!(stats.len(), 1);
	assert_eq!(stats[0].room, "lobby");
	assert_eq!(stats[0].connections, 3);
	assert_eq!(stats[0].identities, 2);
}

#[tokio::test]
async fn bad_joins_are_answered_and_the_socket_stays_open() {
	let (addr, _rooms) = start_server(ConnectionSettings::default()).await;
	let mut ws = connect(addr, None).await;

	for (frame, expected) in [
		("not json", "Invalid join payload"),
		("{}", "Missing room"),
		(r#"{"room":"null"}"#, "Invalid room"),
		(r#"{"room":"elsewhere"}"#, "Room not found"),
	] {
		send_text(&mut ws, frame).await;
		let reply = next_json(&mut ws).await;
		assert_eq!(reply["ServerMessage"]["message"], expected, "frame {frame}");
	}

	join(&mut ws, "lobby").await;
}

#[tokio::test]
async fn banned_user_is_disconnected() {
	let (addr, _rooms) = start_server(ConnectionSettings::default()).await;

	let mut op = connect(addr, Some(&token("mod", "Mod", RoleMask::from_role(Role::Moderator)))).await;
	let mut bob = connect(addr, Some(&token("bob", "Bob", RoleMask::NONE))).await;
	join(&mut op, "lobby").await;
	join(&mut bob, "lobby").await;

	send_text(&mut op, r#"{"command":"!ban bob 1h spam"}"#).await;

	let notice = next_json(&mut bob).await;
	assert_eq!(notice["ServerMessage"]["code"], 0);

	let closed = timeout(WAIT, async {
		loop {
			match bob.next().await {
				Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
				Some(Ok(_)) => continue,
			}
		}
	})
	.await;
	assert!(closed.is_ok(), "banned socket was not closed");

	let mut again = connect(addr, Some(&token("bob", "Bob", RoleMask::NONE))).await;
	send_text(&mut again, r#"{"room":"lobby"}"#).await;
	assert_eq!(next_json(&mut again).await["ServerMessage"]["code"], 0);
}

#[tokio::test]
async fn unanswered_heartbeat_closes_the_connection() {
	let settings = ConnectionSettings {
		heartbeat_interval: Duration::from_millis(100),
		..ConnectionSettings::default()
	};
	let (addr, _rooms) = start_server(settings).await;
	let mut ws = connect(addr, None).await;
	join(&mut ws, "lobby").await;

	assert_eq!(next_text(&mut ws).await, "ping");

	let closed = timeout(WAIT, async {
		loop {
			match ws.next().await {
				Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
				Some(Ok(_)) => continue,
			}
		}
	})
	.await;
	assert!(closed.is_ok(), "silent client was not dropped");
}

#[tokio::test]
async fn answered_heartbeats_keep_the_connection_alive() {
	let settings = ConnectionSettings {
		heartbeat_interval: Duration::from_millis(100),
		..ConnectionSettings::default()
	};
	let (addr, rooms) = start_server(settings).await;
	let mut ws = connect(addr, None).await;
	join(&mut ws, "lobby").await;

	for _ in 0..5 {
		assert_eq!(next_text(&mut ws).await, "ping");
		send_text(&mut ws, "pong").await;
	}

	send_text(&mut ws, r#"{"message":"still here"}"#).await;
	let msg = loop {
		match next_text(&mut ws).await.as_str() {
			"ping" => send_text(&mut ws, "pong").await,
			text => break serde_json::from_str::<Value>(text).expect("valid json"),
		}
	};
	assert_eq!(msg["ChatMessage"]["message"], "still here");
	assert_eq!(rooms.stats().await[0].connections, 1);
}

#[tokio::test]
async fn socket_that_never_joins_is_closed() {
	let settings = ConnectionSettings {
		join_timeout: Duration::from_millis(200),
		..ConnectionSettings::default()
	};
	let (addr, rooms) = start_server(settings).await;
	let mut ws = connect(addr, None).await;

	send_text(&mut ws, "ping").await;
	assert_eq!(next_text(&mut ws).await, "pong");

	let closed = timeout(WAIT, async {
		loop {
			match ws.next().await {
				Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
				Some(Ok(_)) => continue,
			}
		}
	})
	.await;
	assert!(closed.is_ok(), "unbound socket was not dropped");
	assert!(rooms.stats().await.is_empty());
}
