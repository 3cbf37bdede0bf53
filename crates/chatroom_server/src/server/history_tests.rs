#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::server::history::{DEFAULT_HISTORY_CAPACITY, HistoryBuffer};

fn push_n(history: &mut HistoryBuffer, n: usize) {
	for i in 1..=n {
		let raw = format!("{{\"ChatMessage\":{{\"message\":\"m{i}\"}}}}");
		history.push(Arc::from(raw), &format!("m{i}"));
	}
}

#[test]
fn keeps_the_newest_entries_newest_first() {
	let mut history = HistoryBuffer::default();
	push_n(&mut history, DEFAULT_HISTORY_CAPACITY + 1);

	let snapshot = history.snapshot();
	assert_eq!(snapshot.len(), DEFAULT_HISTORY_CAPACITY);
	assert!(snapshot[0].contains("\"m31\""));
	assert!(snapshot[DEFAULT_HISTORY_CAPACITY - 1].contains("\"m2\""));
	assert!(!snapshot.iter().any(|raw| raw.contains("\"m1\"")));
}

#[test]
fn zero_capacity_keeps_nothing() {
	let mut history = HistoryBuffer::new(0);
	push_n(&mut history, 3);
	assert_eq!(history.len(), 0);
	assert!(history.snapshot().is_empty());
}

#[test]
fn purge_removes_matching_entries_case_insensitively() {
	let mut history = HistoryBuffer::new(10);
	history.push(Arc::from("a"), "Hello WORLD");
	history.push(Arc::from("b"), "goodbye");
	history.push(Arc::from("c"), "world peace");

	assert_eq!(history.purge_phrase("World"), 2);
	assert_eq!(history.len(), 1);
	assert_eq!(&*history.snapshot()[0], "b");

	assert_eq!(history.purge_phrase("  "), 0);
	assert_eq!(history.len(), 1);
}
