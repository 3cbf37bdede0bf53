#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::bridge::DEFAULT_TOPIC_PREFIX;
use crate::server::connection::ConnectionSettings;
use crate::server::room::RoomConfig;
use crate::util::secret::SecretString;

const DEFAULT_BRIDGE_CAPACITY: usize = 1024;

/// Default config path: `~/.chatroom/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chatroom").join("config.toml"))
}

/// Load TOML from `path` (missing file means defaults), then apply env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg)?;

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub rooms: RoomSettings,
	pub bridge: BridgeSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret for session tokens. Without it every connection is anonymous.
	pub session_hmac_secret: Option<SecretString>,
	pub heartbeat_interval: Duration,
	pub max_frame_bytes: usize,
	/// Frames queued per connection before it is dropped as too slow.
	pub send_queue_capacity: usize,
	/// How long a connection may stay unbound before it is closed.
	pub join_timeout: Duration,
}

impl Default for ServerSettings {
	fn default() -> Self {
		let conn = ConnectionSettings::default();
		Self {
			metrics_bind: None,
			health_bind: None,
			session_hmac_secret: None,
			heartbeat_interval: conn.heartbeat_interval,
			max_frame_bytes: conn.max_frame_bytes,
			send_queue_capacity: conn.send_queue_capacity,
			join_timeout: conn.join_timeout,
		}
	}
}

#[derive(Debug, Clone)]
pub struct RoomSettings {
	pub history_capacity: usize,
	pub dispatch_batch_size: usize,
	pub embed_cache_ttl: Duration,
	pub idle_timeout: Duration,
	pub mailbox_capacity: usize,
	/// Rooms that exist. Empty means every well-formed room id is accepted.
	pub allowed: Vec<String>,
}

impl Default for RoomSettings {
	fn default() -> Self {
		let room = RoomConfig::default();
		Self {
			history_capacity: room.history_capacity,
			dispatch_batch_size: room.dispatch_batch_size,
			embed_cache_ttl: room.embed_cache_ttl,
			idle_timeout: room.idle_timeout,
			mailbox_capacity: room.mailbox_capacity,
			allowed: Vec::new(),
		}
	}
}

impl RoomSettings {
	pub fn room_config(&self) -> RoomConfig {
		RoomConfig {
			history_capacity: self.history_capacity,
			dispatch_batch_size: self.dispatch_batch_size,
			embed_cache_ttl: self.embed_cache_ttl,
			idle_timeout: self.idle_timeout,
			mailbox_capacity: self.mailbox_capacity,
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeBackend {
	#[default]
	Local,
	Redis,
}

impl BridgeBackend {
	fn parse(s: &str) -> Option<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"local" => Some(Self::Local),
			"redis" => Some(Self::Redis),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
	pub backend: BridgeBackend,
	pub redis_url: Option<String>,
	pub topic_prefix: String,
	/// Per-subscription buffer before a slow room starts lagging.
	pub capacity: usize,
}

impl Default for BridgeSettings {
	fn default() -> Self {
		Self {
			backend: BridgeBackend::Local,
			redis_url: None,
			topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
			capacity: DEFAULT_BRIDGE_CAPACITY,
		}
	}
}

/// Moderation audit trail.
#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	pub enabled: bool,
	/// sqlite:, postgres: or mysql: URL.
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	rooms: FileRoomSettings,

	#[serde(default)]
	bridge: FileBridgeSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	session_hmac_secret: Option<String>,
	heartbeat_interval_secs: Option<u64>,
	max_frame_bytes: Option<usize>,
	send_queue_capacity: Option<usize>,
	join_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileRoomSettings {
	history_capacity: Option<usize>,
	dispatch_batch_size: Option<usize>,
	embed_cache_ttl_secs: Option<u64>,
	idle_timeout_secs: Option<u64>,
	mailbox_capacity: Option<usize>,
	#[serde(default)]
	allowed: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileBridgeSettings {
	backend: Option<BridgeBackend>,
	redis_url: Option<String>,
	topic_prefix: Option<String>,
	capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let defaults = Self::default();

		let server = ServerSettings {
			metrics_bind: non_empty(file.server.metrics_bind),
			health_bind: non_empty(file.server.health_bind),
			session_hmac_secret: non_empty(file.server.session_hmac_secret).map(SecretString::new),
			heartbeat_interval: file
				.server
				.heartbeat_interval_secs
				.filter(|v| *v > 0)
				.map(Duration::from_secs)
				.unwrap_or(defaults.server.heartbeat_interval),
			max_frame_bytes: file
				.server
				.max_frame_bytes
				.filter(|v| *v > 0)
				.unwrap_or(defaults.server.max_frame_bytes),
			send_queue_capacity: file
				.server
				.send_queue_capacity
				.filter(|v| *v > 0)
				.unwrap_or(defaults.server.send_queue_capacity),
			join_timeout: file
				.server
				.join_timeout_secs
				.filter(|v| *v > 0)
				.map(Duration::from_secs)
				.unwrap_or(defaults.server.join_timeout),
		};

		let rooms = RoomSettings {
			history_capacity: file.rooms.history_capacity.unwrap_or(defaults.rooms.history_capacity),
			dispatch_batch_size: file
				.rooms
				.dispatch_batch_size
				.filter(|v| *v > 0)
				.unwrap_or(defaults.rooms.dispatch_batch_size),
			embed_cache_ttl: file
				.rooms
				.embed_cache_ttl_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.rooms.embed_cache_ttl),
			idle_timeout: file
				.rooms
				.idle_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.rooms.idle_timeout),
			mailbox_capacity: file
				.rooms
				.mailbox_capacity
				.filter(|v| *v > 0)
				.unwrap_or(defaults.rooms.mailbox_capacity),
			allowed: file
				.rooms
				.allowed
				.into_iter()
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect(),
		};

		let bridge = BridgeSettings {
			backend: file.bridge.backend.unwrap_or_default(),
			redis_url: non_empty(file.bridge.redis_url),
			topic_prefix: file.bridge.topic_prefix.unwrap_or(defaults.bridge.topic_prefix),
			capacity: file
				.bridge
				.capacity
				.filter(|v| *v > 0)
				.unwrap_or(defaults.bridge.capacity),
		};
		if bridge.backend == BridgeBackend::Redis && bridge.redis_url.is_none() {
			return Err(anyhow!("bridge.backend = \"redis\" requires bridge.redis_url"));
		}

		Ok(Self {
			server,
			rooms,
			bridge,
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: non_empty(file.persistence.database_url),
			},
		})
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => parse_toml(&s).map(Some),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn parse_toml(s: &str) -> anyhow::Result<FileConfig> {
	toml::from_str(s).context("parse TOML")
}

fn env_string(name: &str) -> Option<String> {
	non_empty(std::env::var(name).ok())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
	std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Some(v) = env_string("CHATROOM_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = env_string("CHATROOM_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = env_string("CHATROOM_SESSION_HMAC_SECRET") {
		cfg.server.session_hmac_secret = Some(SecretString::new(v));
		info!("server auth: session_hmac_secret overridden by env");
	}

	if let Some(secs) = env_parse::<u64>("CHATROOM_HEARTBEAT_INTERVAL_SECS").filter(|v| *v > 0) {
		cfg.server.heartbeat_interval = Duration::from_secs(secs);
		info!(secs, "server config: heartbeat_interval overridden by env");
	}

	if let Some(capacity) = env_parse::<usize>("CHATROOM_SEND_QUEUE_CAPACITY").filter(|v| *v > 0) {
		cfg.server.send_queue_capacity = capacity;
		info!(capacity, "server config: send_queue_capacity overridden by env");
	}

	if let Some(secs) = env_parse::<u64>("CHATROOM_JOIN_TIMEOUT_SECS").filter(|v| *v > 0) {
		cfg.server.join_timeout = Duration::from_secs(secs);
		info!(secs, "server config: join_timeout overridden by env");
	}

	if let Some(capacity) = env_parse::<usize>("CHATROOM_HISTORY_CAPACITY") {
		cfg.rooms.history_capacity = capacity;
		info!(capacity, "rooms config: history_capacity overridden by env");
	}

	if let Some(batch) = env_parse::<usize>("CHATROOM_DISPATCH_BATCH_SIZE").filter(|v| *v > 0) {
		cfg.rooms.dispatch_batch_size = batch;
		info!(batch, "rooms config: dispatch_batch_size overridden by env");
	}

	if let Some(secs) = env_parse::<u64>("CHATROOM_EMBED_CACHE_TTL_SECS") {
		cfg.rooms.embed_cache_ttl = Duration::from_secs(secs);
		info!(secs, "rooms config: embed_cache_ttl overridden by env");
	}

	if let Some(secs) = env_parse::<u64>("CHATROOM_IDLE_TIMEOUT_SECS") {
		cfg.rooms.idle_timeout = Duration::from_secs(secs);
		info!(secs, "rooms config: idle_timeout overridden by env");
	}

	if let Some(v) = env_string("CHATROOM_ALLOWED_ROOMS") {
		cfg.rooms.allowed = v
			.split(',')
			.map(|s| s.trim().to_string())
			.filter(|s| !s.is_empty())
			.collect();
		info!(count = cfg.rooms.allowed.len(), "rooms config: allowed overridden by env");
	}

	if let Some(v) = env_string("CHATROOM_BRIDGE_BACKEND") {
		match BridgeBackend::parse(&v) {
			Some(backend) => {
				cfg.bridge.backend = backend;
				info!(?backend, "bridge config: backend overridden by env");
			}
			None => warn!(value = %v, "bridge config: unknown backend in env; ignoring"),
		}
	}

	if let Some(v) = env_string("CHATROOM_REDIS_URL") {
		cfg.bridge.redis_url = Some(v);
		info!("bridge config: redis_url overridden by env");
	}

	if let Ok(v) = std::env::var("CHATROOM_TOPIC_PREFIX") {
		cfg.bridge.topic_prefix = v.trim().to_string();
		info!(prefix = %cfg.bridge.topic_prefix, "bridge config: topic_prefix overridden by env");
	}

	if let Some(enabled) = std::env::var("CHATROOM_PERSISTENCE_ENABLED")
		.ok()
		.as_deref()
		.and_then(parse_env_bool)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Some(v) = env_string("CHATROOM_PERSISTENCE_DATABASE_URL") {
		cfg.persistence.database_url = Some(v);
		info!("persistence: database_url overridden by env");
	}

	if cfg.bridge.backend == BridgeBackend::Redis && cfg.bridge.redis_url.is_none() {
		warn!("bridge config: redis backend selected without redis_url; falling back to local");
		cfg.bridge.backend = BridgeBackend::Local;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_yields_defaults() {
		let cfg = ServerConfig::from_file(parse_toml("").unwrap()).unwrap();
		assert_eq!(cfg.rooms.history_capacity, 30);
		assert_eq!(cfg.rooms.embed_cache_ttl, Duration::from_secs(60));
		assert_eq!(cfg.bridge.backend, BridgeBackend::Local);
		assert_eq!(cfg.bridge.topic_prefix, "chat:");
		assert!(cfg.server.session_hmac_secret.is_none());
		assert!(!cfg.persistence.enabled);
	}

	#[test]
	fn file_values_are_mapped() {
		let toml = r#"
			[server]
			health_bind = "127.0.0.1:9100"
			session_hmac_secret = "  s3cret  "
			heartbeat_interval_secs = 10
			send_queue_capacity = 32
			join_timeout_secs = 5

			[rooms]
			history_capacity = 5
			allowed = ["lobby", " ", "games"]

			[bridge]
			backend = "redis"
			redis_url = "redis://127.0.0.1/"
			topic_prefix = "room:"

			[persistence]
			enabled = true
			database_url = "sqlite::memory:"
		"#;
		let cfg = ServerConfig::from_file(parse_toml(toml).unwrap()).unwrap();
		assert_eq!(cfg.server.health_bind.as_deref(), Some("127.0.0.1:9100"));
		assert_eq!(cfg.server.session_hmac_secret.as_ref().map(|s| s.expose()), Some("s3cret"));
		assert_eq!(cfg.server.heartbeat_interval, Duration::from_secs(10));
		assert_eq!(cfg.server.send_queue_capacity, 32);
		assert_eq!(cfg.server.join_timeout, Duration::from_secs(5));
		assert_eq!(cfg.rooms.history_capacity, 5);
		assert_eq!(cfg.rooms.allowed, vec!["lobby".to_string(), "games".to_string()]);
		assert_eq!(cfg.bridge.backend, BridgeBackend::Redis);
		assert_eq!(cfg.bridge.topic_prefix, "room:");
		assert!(cfg.persistence.enabled);
	}

	#[test]
	fn redis_backend_requires_url() {
		let toml = "[bridge]\nbackend = \"redis\"\n";
		assert!(ServerConfig::from_file(parse_toml(toml).unwrap()).is_err());
	}

	#[test]
	fn unknown_backend_is_a_parse_error() {
		assert!(parse_toml("[bridge]\nbackend = \"kafka\"\n").is_err());
	}

	#[test]
	fn env_bools() {
		assert_eq!(parse_env_bool(" Yes "), Some(true));
		assert_eq!(parse_env_bool("off"), Some(false));
		assert_eq!(parse_env_bool("maybe"), None);
	}

	#[test]
	fn missing_file_is_not_an_error() {
		let path = std::env::temp_dir().join("chatroom-config-does-not-exist.toml");
		assert!(read_toml_if_exists(&path).unwrap().is_none());
	}
}
