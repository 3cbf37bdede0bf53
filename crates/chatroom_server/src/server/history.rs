#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

#[derive(Debug, Clone)]
struct HistoryEntry {
	raw: Arc<str>,
	/// Lowercased chat text, kept for phrase purges.
	text: String,
}

/// Bounded replay window of encoded chat payloads, newest first.
#[derive(Debug)]
pub struct HistoryBuffer {
	entries: VecDeque<HistoryEntry>,
	capacity: usize,
}

impl HistoryBuffer {
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	pub fn push(&mut self, raw: Arc<str>, text: &str) {
		if self.capacity == 0 {
			return;
		}
		self.entries.push_front(HistoryEntry {
			raw,
			text: text.to_lowercase(),
		});
		self.entries.truncate(self.capacity);
	}

	pub fn snapshot(&self) -> Vec<Arc<str>> {
		self.entries.iter().map(|e| Arc::clone(&e.raw)).collect()
	}

	/// Drop every entry containing `phrase` (case-insensitive). Returns how many were removed.
	pub fn purge_phrase(&mut self, phrase: &str) -> usize {
		let phrase = phrase.trim().to_lowercase();
		if phrase.is_empty() {
			return 0;
		}
		let before = self.entries.len();
		self.entries.retain(|e| !e.text.contains(&phrase));
		before - self.entries.len()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}
}

impl Default for HistoryBuffer {
	fn default() -> Self {
		Self::new(DEFAULT_HISTORY_CAPACITY)
	}
}
