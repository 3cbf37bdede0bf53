#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chatroom_domain::{Identity, RoleMask, StatusMask, UserId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::util::secret::SecretString;

pub const SESSION_COOKIE: &str = "session";

/// Request metadata captured during the WebSocket upgrade.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
	pub cookie: Option<String>,
	pub authorization: Option<String>,
	pub query: Option<String>,
}

impl Handshake {
	/// Session token from the `session` cookie, a bearer header, or `?token=`, in that order.
	pub fn session_token(&self) -> Option<&str> {
		let from_cookie = self.cookie.as_deref().and_then(|header| {
			header.split(';').find_map(|pair| {
				let (name, value) = pair.trim().split_once('=')?;
				(name.trim() == SESSION_COOKIE).then(|| value.trim())
			})
		});

		let from_header = || {
			self.authorization
				.as_deref()
				.and_then(|v| v.trim().strip_prefix("Bearer "))
				.map(str::trim)
		};

		let from_query = || {
			self.query.as_deref().and_then(|q| {
				q.split('&').find_map(|pair| {
					let (name, value) = pair.split_once('=')?;
					(name == "token").then_some(value)
				})
			})
		};

		from_cookie
			.or_else(from_header)
			.or_else(from_query)
			.filter(|t| !t.is_empty())
	}
}

/// Resolves the handshake to an identity; `None` means anonymous.
#[async_trait]
pub trait SessionResolver: Send + Sync + 'static {
	async fn resolve(&self, handshake: &Handshake) -> Option<Identity>;
}

/// Treats every connection as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousOnly;

#[async_trait]
impl SessionResolver for AnonymousOnly {
	async fn resolve(&self, _handshake: &Handshake) -> Option<Identity> {
		None
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
	pub sub: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub roles: RoleMask,
	#[serde(default = "StatusMask::valid")]
	pub status: StatusMask,
	pub exp: u64,
}

/// Stateless `v1.<payload>.<signature>` session tokens signed with HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct HmacSessionResolver {
	secret: SecretString,
}

impl HmacSessionResolver {
	pub fn new(secret: SecretString) -> Self {
		Self { secret }
	}
}

#[async_trait]
impl SessionResolver for HmacSessionResolver {
	async fn resolve(&self, handshake: &Handshake) -> Option<Identity> {
		let token = handshake.session_token()?;
		let claims = match verify_hmac_token(token, self.secret.expose()) {
			Ok(claims) => claims,
			Err(e) => {
				debug!(error = %e, "session token rejected; treating as anonymous");
				return None;
			}
		};

		let id = UserId::new(claims.sub.clone()).ok()?;
		let name = claims.name.filter(|n| !n.trim().is_empty()).unwrap_or(claims.sub);
		let mut identity = Identity::user(id, name, claims.roles);
		identity.status = claims.status;
		Some(identity)
	}
}

pub fn verify_hmac_token(token: &str, secret: &str) -> anyhow::Result<SessionClaims> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(anyhow!("invalid token format"));
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).context("decode token payload")?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.as_bytes())?;
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).context("decode token signature")?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(anyhow!("invalid token signature"));
	}

	let claims: SessionClaims = serde_json::from_slice(&payload).context("parse token claims")?;
	let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
	if claims.exp <= now {
		return Err(anyhow!("token expired"));
	}

	Ok(claims)
}

/// Mint a token the way the account service does.
#[cfg(test)]
pub fn sign_hmac_token(claims: &SessionClaims, secret: &str) -> anyhow::Result<String> {
	let payload = serde_json::to_vec(claims).context("encode claims")?;
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig = sign(payload_b64.as_bytes(), secret.as_bytes())?;
	Ok(format!("v1.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig)))
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> anyhow::Result<Vec<u8>> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|e| anyhow!("hmac key: {e}"))?;
	mac.update(payload_b64);
	Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}
