#![forbid(unsafe_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use chatroom_domain::UserId;

use crate::server::ledger::{LedgerOp, ModerationLedger};

fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

#[tokio::test(start_paused = true)]
async fn ban_expires_and_is_removed_by_the_observing_read() {
	let mut ledger = ModerationLedger::new();
	let alice = user("alice");

	ledger.ban(alice.clone(), "Alice", Duration::from_secs(10));
	assert_eq!(ledger.entry_count(), 1);

	tokio::time::advance(Duration::from_secs(9)).await;
	let left = ledger.is_banned(&alice).expect("still banned");
	assert_eq!(left, Duration::from_secs(1));

	tokio::time::advance(Duration::from_secs(1)).await;
	assert_eq!(ledger.entry_count(), 1, "expiry is lazy");
	assert!(ledger.is_banned(&alice).is_none());
	assert_eq!(ledger.entry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn mute_is_independent_of_ban() {
	let mut ledger = ModerationLedger::new();
	let bob = user("bob");

	ledger.mute(bob.clone(), "Bob", Duration::from_secs(60));
	assert!(ledger.is_muted(&bob).is_some());
	assert!(ledger.is_banned(&bob).is_none());

	assert!(ledger.clear_mute(&bob));
	assert!(!ledger.clear_mute(&bob));
	assert!(ledger.is_muted(&bob).is_none());
}

#[tokio::test(start_paused = true)]
async fn rebanning_replaces_the_deadline() {
	let mut ledger = ModerationLedger::new();
	let carol = user("carol");

	ledger.ban(carol.clone(), "Carol", Duration::from_secs(100));
	ledger.ban(carol.clone(), "Carol", Duration::from_secs(5));

	tokio::time::advance(Duration::from_secs(6)).await;
	assert!(ledger.is_banned(&carol).is_none());
}

#[tokio::test(start_paused = true)]
async fn ip_bans_expire() {
	let mut ledger = ModerationLedger::new();
	let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

	ledger.ban_ip(ip, Duration::from_secs(30));
	assert!(ledger.is_ip_banned(ip).is_some());
	assert!(ledger.is_ip_banned(IpAddr::V4(Ipv4Addr::LOCALHOST)).is_none());

	tokio::time::advance(Duration::from_secs(31)).await;
	assert!(ledger.is_ip_banned(ip).is_none());
	assert_eq!(ledger.entry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn phrases_match_case_insensitively_and_may_be_permanent() {
	let mut ledger = ModerationLedger::new();

	ledger.ban_phrase("Spoiler", None);
	ledger.ban_phrase("rickroll", Some(Duration::from_secs(5)));
	ledger.ban_phrase("   ", None);

	assert_eq!(ledger.blocked_phrase("big SPOILERS ahead").as_deref(), Some("spoiler"));
	assert_eq!(ledger.blocked_phrase("no rickroll pls").as_deref(), Some("rickroll"));
	assert!(ledger.blocked_phrase("hello there").is_none());

	tokio::time::advance(Duration::from_secs(10)).await;
	assert!(ledger.blocked_phrase("no rickroll pls").is_none());
	assert!(ledger.is_phrase_blocked("SPOILER"));
	assert!(!ledger.is_phrase_blocked("spoil"));

	assert!(ledger.clear_phrase(" spoiler "));
	assert!(ledger.blocked_phrase("big spoilers ahead").is_none());
}

#[tokio::test(start_paused = true)]
async fn live_entries_track_expiry() {
	let mut ledger = ModerationLedger::new();
	assert!(!ledger.has_live_entries());

	ledger.mute(user("dave"), "Dave", Duration::from_secs(2));
	assert!(ledger.has_live_entries());

	tokio::time::advance(Duration::from_secs(3)).await;
	assert!(!ledger.has_live_entries());
	assert_eq!(ledger.entry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn sanctioned_users_are_found_by_id_or_name() {
	let mut ledger = ModerationLedger::new();
	ledger.ban(user("u-42"), "Erin", Duration::from_secs(60));

	assert_eq!(ledger.find_sanctioned("erin"), Some(user("u-42")));
	assert_eq!(ledger.find_sanctioned("u-42"), Some(user("u-42")));
	assert!(ledger.find_sanctioned("frank").is_none());
}

#[tokio::test(start_paused = true)]
async fn replicated_ops_apply_like_local_calls() {
	let mut ledger = ModerationLedger::new();
	let gina = user("gina");

	let ops = [
		LedgerOp::Ban {
			user: gina.clone(),
			name: "Gina".to_string(),
			duration_ms: 60_000,
		},
		LedgerOp::Mute {
			user: gina.clone(),
			name: "Gina".to_string(),
			duration_ms: 60_000,
		},
		LedgerOp::BanPhrase {
			phrase: "bad".to_string(),
			duration_ms: None,
		},
	];
	for op in &ops {
		let wire = serde_json::to_string(op).unwrap();
		let back: LedgerOp = serde_json::from_str(&wire).unwrap();
		ledger.apply(&back);
	}

	assert!(ledger.is_banned(&gina).is_some());
	assert!(ledger.is_muted(&gina).is_some());
	assert!(ledger.blocked_phrase("so bad").is_some());

	ledger.apply(&LedgerOp::ClearBan { user: gina.clone() });
	ledger.apply(&LedgerOp::ClearPhrase {
		phrase: "BAD".to_string(),
	});
	assert!(ledger.is_banned(&gina).is_none());
	assert!(ledger.blocked_phrase("so bad").is_none());
}

#[test]
fn ledger_ops_use_snake_case_tags() {
	let op = LedgerOp::ClearMute { user: user("hank") };
	let json = serde_json::to_value(&op).unwrap();
	assert_eq!(json["op"], "clear_mute");
	assert_eq!(json["user"], "hank");
}
