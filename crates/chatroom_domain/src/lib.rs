#![forbid(unsafe_code)]

pub mod duration;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use duration::{ParseDurationError, format_duration, parse_duration};

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("reserved value: {0}")]
	Reserved(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Chat room (channel) identifier.
///
/// `"null"` is rejected because clients that lost their channel reference send it literally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
	/// Maximum accepted room id length in bytes.
	pub const MAX_LEN: usize = 64;

	/// Create a validated `RoomId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let trimmed = id.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if trimmed.eq_ignore_ascii_case("null") || trimmed.eq_ignore_ascii_case("undefined") {
			return Err(ParseIdError::Reserved(trimmed.to_string()));
		}
		if trimmed.len() > Self::MAX_LEN {
			return Err(ParseIdError::InvalidFormat(format!("longer than {} bytes", Self::MAX_LEN)));
		}
		if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
			return Err(ParseIdError::InvalidFormat(
				"expected ascii letters, digits, '_' or '-'".to_string(),
			));
		}
		Ok(Self(trimmed.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

impl TryFrom<String> for RoomId {
	type Error = ParseIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		RoomId::new(value)
	}
}

impl From<RoomId> for String {
	fn from(value: RoomId) -> Self {
		value.0
	}
}

/// Stable user identifier issued by the account system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		if id == ANON_KEY {
			return Err(ParseIdError::Reserved(id));
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Registry/ledger key for anonymous identities.
pub const ANON_KEY: &str = "anon";

/// Registry key: a user id, or the shared anonymous sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
	User(UserId),
	Anonymous,
}

impl IdentityKey {
	pub fn as_str(&self) -> &str {
		match self {
			IdentityKey::User(id) => id.as_str(),
			IdentityKey::Anonymous => ANON_KEY,
		}
	}

	pub fn user_id(&self) -> Option<&UserId> {
		match self {
			IdentityKey::User(id) => Some(id),
			IdentityKey::Anonymous => None,
		}
	}
}

impl fmt::Display for IdentityKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Chat roles, ordered by precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
	Owner,
	Admin,
	Moderator,
	Vip,
	SubTier1,
	SubTier2,
	SubTier3,
	Bot,
}

impl Role {
	pub const ALL: [Role; 8] = [
		Role::Owner,
		Role::Admin,
		Role::Moderator,
		Role::Vip,
		Role::SubTier3,
		Role::SubTier2,
		Role::SubTier1,
		Role::Bot,
	];

	pub const fn bit(self) -> u32 {
		match self {
			Role::Owner => 1 << 0,
			Role::Admin => 1 << 1,
			Role::Moderator => 1 << 2,
			Role::Vip => 1 << 3,
			Role::SubTier1 => 1 << 4,
			Role::SubTier2 => 1 << 5,
			Role::SubTier3 => 1 << 6,
			Role::Bot => 1 << 7,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Role::Owner => "owner",
			Role::Admin => "admin",
			Role::Moderator => "mod",
			Role::Vip => "vip",
			Role::SubTier1 => "sub",
			Role::SubTier2 => "sub2",
			Role::SubTier3 => "sub3",
			Role::Bot => "bot",
		}
	}

	/// Badge icon name rendered by the chat client.
	pub const fn icon(self) -> &'static str {
		match self {
			Role::Owner => "crown",
			Role::Admin => "shield-star",
			Role::Moderator => "sword",
			Role::Vip => "gem",
			Role::SubTier1 => "star",
			Role::SubTier2 => "star-half",
			Role::SubTier3 => "star-full",
			Role::Bot => "robot",
		}
	}

	pub const fn color(self) -> &'static str {
		match self {
			Role::Owner => "#e91916",
			Role::Admin => "#ff8c00",
			Role::Moderator => "#00ad03",
			Role::Vip => "#e005b9",
			Role::SubTier1 => "#8205b4",
			Role::SubTier2 => "#9146ff",
			Role::SubTier3 => "#bf94ff",
			Role::Bot => "#5c5c66",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Role bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMask(pub u32);

impl RoleMask {
	pub const NONE: RoleMask = RoleMask(0);

	/// Roles allowed to issue commands.
	pub const PRIVILEGED: RoleMask = RoleMask(Role::Owner.bit() | Role::Admin.bit() | Role::Moderator.bit() | Role::Bot.bit());

	pub const fn from_role(role: Role) -> Self {
		Self(role.bit())
	}

	pub const fn with(self, role: Role) -> Self {
		Self(self.0 | role.bit())
	}

	pub const fn contains(self, role: Role) -> bool {
		self.0 & role.bit() != 0
	}

	pub const fn intersects(self, other: RoleMask) -> bool {
		self.0 & other.0 != 0
	}

	pub fn is_privileged(self) -> bool {
		self.intersects(Self::PRIVILEGED)
	}

	/// Roles present in the mask, highest precedence first.
	pub fn roles(self) -> impl Iterator<Item = Role> {
		Role::ALL.into_iter().filter(move |r| self.contains(*r))
	}
}

impl FromIterator<Role> for RoleMask {
	fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
		iter.into_iter().fold(RoleMask::NONE, RoleMask::with)
	}
}

/// Persisted account status bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMask(pub u32);

impl StatusMask {
	pub const VALID: u32 = 1 << 0;
	pub const BANNED: u32 = 1 << 1;
	pub const MUTED: u32 = 1 << 2;

	pub const fn valid() -> Self {
		Self(Self::VALID)
	}

	pub const fn is_banned(self) -> bool {
		self.0 & Self::BANNED != 0
	}

	pub const fn is_muted(self) -> bool {
		self.0 & Self::MUTED != 0
	}
}

/// A resolved user, or the anonymous sentinel when `id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub id: Option<UserId>,
	pub display_name: String,
	pub roles: RoleMask,
	pub status: StatusMask,
}

impl Identity {
	pub fn user(id: UserId, display_name: impl Into<String>, roles: RoleMask) -> Self {
		Self {
			id: Some(id),
			display_name: display_name.into(),
			roles,
			status: StatusMask::valid(),
		}
	}

	pub fn anonymous() -> Self {
		Self {
			id: None,
			display_name: ANON_KEY.to_string(),
			roles: RoleMask::NONE,
			status: StatusMask::valid(),
		}
	}

	pub fn is_anonymous(&self) -> bool {
		self.id.is_none()
	}

	pub fn key(&self) -> IdentityKey {
		match &self.id {
			Some(id) => IdentityKey::User(id.clone()),
			None => IdentityKey::Anonymous,
		}
	}

	pub fn is_privileged(&self) -> bool {
		self.roles.is_privileged()
	}
}

/// Server-assigned chat event (poll) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub uuid::Uuid);

impl EventId {
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for EventId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for EventId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		uuid::Uuid::parse_str(s.trim())
			.map(EventId)
			.map_err(|e| ParseIdError::InvalidFormat(e.to_string()))
	}
}
