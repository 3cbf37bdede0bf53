#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_EMBED_TTL: Duration = Duration::from_secs(60);

/// Cached per-embed-source connection counts for the `embeds` request.
#[derive(Debug)]
pub struct EmbedAggregateCache {
	ttl: Duration,
	computed_at: Option<Instant>,
	value: BTreeMap<String, usize>,
}

impl EmbedAggregateCache {
	pub fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			computed_at: None,
			value: BTreeMap::new(),
		}
	}

	/// Cached value, recomputed with `compute` once older than the TTL.
	pub fn get_or_refresh(&mut self, compute: impl FnOnce() -> BTreeMap<String, usize>) -> &BTreeMap<String, usize> {
		let now = Instant::now();
		let stale = self
			.computed_at
			.is_none_or(|at| now.saturating_duration_since(at) >= self.ttl);
		if stale {
			self.value = compute();
			self.computed_at = Some(now);
		}
		&self.value
	}
}

impl Default for EmbedAggregateCache {
	fn default() -> Self {
		Self::new(DEFAULT_EMBED_TTL)
	}
}
