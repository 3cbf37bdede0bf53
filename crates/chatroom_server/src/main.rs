#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use chatroom_domain::RoomId;
use chatroom_util::endpoint::WsEndpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{BridgeBackend, ServerConfig};
use crate::server::audit::AuditService;
use crate::server::auth::{AnonymousOnly, HmacSessionResolver, SessionResolver};
use crate::server::bridge::{LocalBridge, PubSubBridge, RedisBridge};
use crate::server::connection::{ConnectionContext, ConnectionSettings, serve};
use crate::server::directory::{AllowAllRooms, RoomDirectory, StaticRooms};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::room::RoomContext;
use crate::server::rooms::RoomManager;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatroom_server [--bind ws://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: ws://127.0.0.1:9002)\n\
\t         Format: ws://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "ws://127.0.0.1:9002".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = WsEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	bind.to_socket_addr().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatroom_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("chatroom_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

async fn build_bridge(cfg: &ServerConfig) -> anyhow::Result<Arc<dyn PubSubBridge>> {
	let bridge = &cfg.bridge;
	match (bridge.backend, bridge.redis_url.as_deref()) {
		(BridgeBackend::Redis, Some(url)) => {
			let redis = RedisBridge::connect(url, bridge.topic_prefix.clone(), bridge.capacity).await?;
			info!(process_id = %redis.process_id(), prefix = %bridge.topic_prefix, "redis bridge connected");
			Ok(Arc::new(redis))
		}
		_ => {
			let local = LocalBridge::new(bridge.topic_prefix.clone(), bridge.capacity);
			info!(process_id = %local.process_id(), "using in-process bridge");
			Ok(Arc::new(local))
		}
	}
}

fn build_directory(cfg: &ServerConfig) -> Arc<dyn RoomDirectory> {
	if cfg.rooms.allowed.is_empty() {
		return Arc::new(AllowAllRooms);
	}

	let rooms = cfg.rooms.allowed.iter().filter_map(|name| match RoomId::new(name.clone()) {
		Ok(room) => Some(room),
		Err(e) => {
			warn!(room = %name, error = %e, "ignoring invalid room in allow-list");
			None
		}
	});
	let directory = StaticRooms::new(rooms);
	info!(rooms = directory.len(), "room allow-list loaded");
	Arc::new(directory)
}

fn build_sessions(cfg: &ServerConfig) -> Arc<dyn SessionResolver> {
	match cfg.server.session_hmac_secret.clone() {
		Some(secret) => Arc::new(HmacSessionResolver::new(secret)),
		None => {
			warn!("no session_hmac_secret configured; all connections are anonymous");
			Arc::new(AnonymousOnly)
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let audit = if server_cfg.persistence.enabled {
		let Some(database_url) = server_cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};
		AuditService::connect(database_url).await?
	} else {
		AuditService::disabled()
	};
	info!(enabled = audit.is_enabled(), "moderation audit");

	let bridge = build_bridge(&server_cfg).await?;

	let rooms = RoomManager::new(RoomContext {
		bridge,
		audit,
		config: server_cfg.rooms.room_config(),
	});

	let health_state = HealthState::new().with_rooms(rooms.clone());
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let ctx = ConnectionContext {
		rooms,
		sessions: build_sessions(&server_cfg),
		directory: build_directory(&server_cfg),
		settings: ConnectionSettings {
			heartbeat_interval: server_cfg.server.heartbeat_interval,
			max_frame_bytes: server_cfg.server.max_frame_bytes,
			send_queue_capacity: server_cfg.server.send_queue_capacity,
			join_timeout: server_cfg.server.join_timeout,
			..ConnectionSettings::default()
		},
	};

	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind {bind_addr}"))?;
	info!(bind = %bind_addr, "chatroom_server: websocket endpoint ready");

	health_state.mark_ready();

	serve(listener, ctx).await
}
