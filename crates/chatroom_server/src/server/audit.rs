#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};

/// One moderation command, as written to the audit trail.
#[derive(Debug, Clone)]
pub struct ModerationRecord {
	pub room: String,
	pub actor_id: Option<String>,
	pub actor_name: String,
	pub action: &'static str,
	pub target: Option<String>,
	pub duration_ms: Option<i64>,
	pub reason: Option<String>,
}

/// Optional SQL audit trail for moderation commands.
#[derive(Clone, Default)]
pub struct AuditService {
	backend: Option<AuditBackend>,
}

#[derive(Clone)]
enum AuditBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
	Mysql(sqlx::MySqlPool),
}

const CREATE_TABLE_SQLITE: &str = "CREATE TABLE IF NOT EXISTS moderation_audit (\
	id INTEGER PRIMARY KEY AUTOINCREMENT, \
	room TEXT NOT NULL, actor_id TEXT, actor_name TEXT NOT NULL, action TEXT NOT NULL, \
	target TEXT, duration_ms BIGINT, reason TEXT, created_at BIGINT NOT NULL)";

const CREATE_TABLE_POSTGRES: &str = "CREATE TABLE IF NOT EXISTS moderation_audit (\
	id BIGSERIAL PRIMARY KEY, \
	room TEXT NOT NULL, actor_id TEXT, actor_name TEXT NOT NULL, action TEXT NOT NULL, \
	target TEXT, duration_ms BIGINT, reason TEXT, created_at TIMESTAMPTZ NOT NULL)";

const CREATE_TABLE_MYSQL: &str = "CREATE TABLE IF NOT EXISTS moderation_audit (\
	id BIGINT AUTO_INCREMENT PRIMARY KEY, \
	room VARCHAR(64) NOT NULL, actor_id VARCHAR(255), actor_name VARCHAR(255) NOT NULL, action VARCHAR(32) NOT NULL, \
	target VARCHAR(255), duration_ms BIGINT, reason TEXT, created_at DATETIME NOT NULL)";

impl AuditService {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let backend = if database_url.starts_with("sqlite:") {
			let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
			sqlx::query(CREATE_TABLE_SQLITE)
				.execute(&pool)
				.await
				.context("create moderation_audit (sqlite)")?;
			AuditBackend::Sqlite(pool)
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			sqlx::query(CREATE_TABLE_POSTGRES)
				.execute(&pool)
				.await
				.context("create moderation_audit (postgres)")?;
			AuditBackend::Postgres(pool)
		} else if database_url.starts_with("mysql:") || database_url.starts_with("mariadb:") {
			let pool = sqlx::MySqlPool::connect(database_url).await.context("connect mysql")?;
			sqlx::query(CREATE_TABLE_MYSQL)
				.execute(&pool)
				.await
				.context("create moderation_audit (mysql)")?;
			AuditBackend::Mysql(pool)
		} else {
			return Err(anyhow!("unsupported database_url for audit"));
		};

		Ok(Self { backend: Some(backend) })
	}

	pub fn disabled() -> Self {
		Self { backend: None }
	}

	pub fn is_enabled(&self) -> bool {
		self.backend.is_some()
	}

	pub async fn record(&self, rec: &ModerationRecord) -> anyhow::Result<()> {
		let Some(backend) = &self.backend else {
			return Ok(());
		};

		match backend {
			AuditBackend::Sqlite(pool) => {
				sqlx::query(
					"INSERT INTO moderation_audit (room, actor_id, actor_name, action, target, duration_ms, reason, created_at) \
					VALUES (?, ?, ?, ?, ?, ?, ?, strftime('%s','now'))",
				)
				.bind(&rec.room)
				.bind(rec.actor_id.as_deref())
				.bind(&rec.actor_name)
				.bind(rec.action)
				.bind(rec.target.as_deref())
				.bind(rec.duration_ms)
				.bind(rec.reason.as_deref())
				.execute(pool)
				.await
				.context("insert moderation_audit (sqlite)")?;
			}
			AuditBackend::Postgres(pool) => {
				sqlx::query(
					"INSERT INTO moderation_audit (room, actor_id, actor_name, action, target, duration_ms, reason, created_at) \
					VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
				)
				.bind(&rec.room)
				.bind(rec.actor_id.as_deref())
				.bind(&rec.actor_name)
				.bind(rec.action)
				.bind(rec.target.as_deref())
				.bind(rec.duration_ms)
				.bind(rec.reason.as_deref())
				.execute(pool)
				.await
				.context("insert moderation_audit (postgres)")?;
			}
			AuditBackend::Mysql(pool) => {
				sqlx::query(
					"INSERT INTO moderation_audit (room, actor_id, actor_name, action, target, duration_ms, reason, created_at) \
					VALUES (?, ?, ?, ?, ?, ?, ?, NOW())",
				)
				.bind(&rec.room)
				.bind(rec.actor_id.as_deref())
				.bind(&rec.actor_name)
				.bind(rec.action)
				.bind(rec.target.as_deref())
				.bind(rec.duration_ms)
				.bind(rec.reason.as_deref())
				.execute(pool)
				.await
				.context("insert moderation_audit (mysql)")?;
			}
		}

		Ok(())
	}
}
