#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use chatroom_domain::UserId;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Per-room moderation state: user bans and mutes, IP bans and blocked phrases.
///
/// Expiry is lazy: an entry whose deadline has passed is removed by the read that observes it.
#[derive(Debug, Default)]
pub struct ModerationLedger {
	bans: HashMap<UserId, Sanction>,
	mutes: HashMap<UserId, Sanction>,
	ip_bans: HashMap<IpAddr, Instant>,
	/// Lowercased phrase -> optional deadline (`None` never expires).
	phrases: HashMap<String, Option<Instant>>,
}

#[derive(Debug, Clone)]
struct Sanction {
	expires_at: Instant,
	display_name: String,
}

/// A ledger mutation, replicated to other processes over the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerOp {
	Ban {
		user: UserId,
		name: String,
		duration_ms: u64,
	},
	Mute {
		user: UserId,
		name: String,
		duration_ms: u64,
	},
	ClearBan {
		user: UserId,
	},
	ClearMute {
		user: UserId,
	},
	BanIp {
		ip: IpAddr,
		duration_ms: u64,
	},
	BanPhrase {
		phrase: String,
		duration_ms: Option<u64>,
	},
	ClearPhrase {
		phrase: String,
	},
}

fn remaining(expires_at: Instant, now: Instant) -> Option<Duration> {
	let left = expires_at.saturating_duration_since(now);
	(!left.is_zero()).then_some(left)
}

fn deadline(now: Instant, duration: Duration) -> Instant {
	now.checked_add(duration)
		.unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 60 * 60))
}

fn normalize_phrase(phrase: &str) -> String {
	phrase.trim().to_lowercase()
}

impl ModerationLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Remaining ban time, or `None` when the user is not banned.
	pub fn is_banned(&mut self, user: &UserId) -> Option<Duration> {
		check(&mut self.bans, user, Instant::now())
	}

	/// Remaining mute time, or `None` when the user is not muted.
	pub fn is_muted(&mut self, user: &UserId) -> Option<Duration> {
		check(&mut self.mutes, user, Instant::now())
	}

	pub fn ban(&mut self, user: UserId, display_name: impl Into<String>, duration: Duration) {
		let expires_at = deadline(Instant::now(), duration);
		self.bans.insert(
			user,
			Sanction {
				expires_at,
				display_name: display_name.into(),
			},
		);
	}

	pub fn mute(&mut self, user: UserId, display_name: impl Into<String>, duration: Duration) {
		let expires_at = deadline(Instant::now(), duration);
		self.mutes.insert(
			user,
			Sanction {
				expires_at,
				display_name: display_name.into(),
			},
		);
	}

	/// Returns whether a ban was removed.
	pub fn clear_ban(&mut self, user: &UserId) -> bool {
		self.bans.remove(user).is_some()
	}

	pub fn clear_mute(&mut self, user: &UserId) -> bool {
		self.mutes.remove(user).is_some()
	}

	pub fn ban_ip(&mut self, ip: IpAddr, duration: Duration) {
		self.ip_bans.insert(ip, deadline(Instant::now(), duration));
	}

	pub fn is_ip_banned(&mut self, ip: IpAddr) -> Option<Duration> {
		let now = Instant::now();
		let expires_at = *self.ip_bans.get(&ip)?;
		let left = remaining(expires_at, now);
		if left.is_none() {
			self.ip_bans.remove(&ip);
		}
		left
	}

	/// Block a phrase room-wide. Without a duration the block never expires.
	pub fn ban_phrase(&mut self, phrase: &str, duration: Option<Duration>) {
		let phrase = normalize_phrase(phrase);
		if phrase.is_empty() {
			return;
		}
		let now = Instant::now();
		self.phrases.insert(phrase, duration.map(|d| deadline(now, d)));
	}

	pub fn clear_phrase(&mut self, phrase: &str) -> bool {
		self.phrases.remove(&normalize_phrase(phrase)).is_some()
	}

	/// Whether exactly `phrase` is currently blocked.
	pub fn is_phrase_blocked(&mut self, phrase: &str) -> bool {
		self.prune_phrases(Instant::now());
		self.phrases.contains_key(&normalize_phrase(phrase))
	}

	/// First live blocked phrase contained in `text` (case-insensitive).
	pub fn blocked_phrase(&mut self, text: &str) -> Option<String> {
		self.prune_phrases(Instant::now());

		let haystack = text.to_lowercase();
		self.phrases
			.keys()
			.find(|phrase| haystack.contains(phrase.as_str()))
			.cloned()
	}

	/// Find a sanctioned user by id or display name (case-insensitive).
	///
	/// Used to resolve targets of clear commands once the user has left the room.
	pub fn find_sanctioned(&self, needle: &str) -> Option<UserId> {
		self.bans
			.iter()
			.chain(self.mutes.iter())
			.find(|(id, s)| id.as_str() == needle || s.display_name.eq_ignore_ascii_case(needle))
			.map(|(id, _)| id.clone())
	}

	/// Drop every expired entry and report whether anything is still live.
	pub fn has_live_entries(&mut self) -> bool {
		let now = Instant::now();
		self.bans.retain(|_, s| remaining(s.expires_at, now).is_some());
		self.mutes.retain(|_, s| remaining(s.expires_at, now).is_some());
		self.ip_bans.retain(|_, at| remaining(*at, now).is_some());
		self.prune_phrases(now);

		!(self.bans.is_empty() && self.mutes.is_empty() && self.ip_bans.is_empty() && self.phrases.is_empty())
	}

	fn prune_phrases(&mut self, now: Instant) {
		self.phrases
			.retain(|_, expires_at| expires_at.is_none_or(|at| remaining(at, now).is_some()));
	}

	/// Apply a (possibly replicated) mutation.
	pub fn apply(&mut self, op: &LedgerOp) {
		match op {
			LedgerOp::Ban {
				user,
				name,
				duration_ms,
			} => self.ban(user.clone(), name.clone(), Duration::from_millis(*duration_ms)),
			LedgerOp::Mute {
				user,
				name,
				duration_ms,
			} => self.mute(user.clone(), name.clone(), Duration::from_millis(*duration_ms)),
			LedgerOp::ClearBan { user } => {
				self.clear_ban(user);
			}
			LedgerOp::ClearMute { user } => {
				self.clear_mute(user);
			}
			LedgerOp::BanIp { ip, duration_ms } => self.ban_ip(*ip, Duration::from_millis(*duration_ms)),
			LedgerOp::BanPhrase { phrase, duration_ms } => {
				self.ban_phrase(phrase, duration_ms.map(Duration::from_millis))
			}
			LedgerOp::ClearPhrase { phrase } => {
				self.clear_phrase(phrase);
			}
		}
	}

	#[cfg(test)]
	pub(crate) fn entry_count(&self) -> usize {
		self.bans.len() + self.mutes.len() + self.ip_bans.len() + self.phrases.len()
	}
}

fn check(map: &mut HashMap<UserId, Sanction>, user: &UserId, now: Instant) -> Option<Duration> {
	let expires_at = map.get(user)?.expires_at;
	let left = remaining(expires_at, now);
	if left.is_none() {
		map.remove(user);
	}
	left
}
