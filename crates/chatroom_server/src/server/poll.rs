#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::time::Duration;

use chatroom_domain::{EventId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;

pub const EVENT_POLL: &str = "event-poll";
pub const EVENT_CLOSE: &str = "event-close";

/// Why a poll response was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRejection {
	WrongEvent,
	OutOfRange,
	AlreadyAnswered,
}

/// Poll lifecycle replicated to the other processes serving a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PollOp {
	Open {
		id: EventId,
		author: String,
		title: String,
		options: Vec<String>,
		duration_ms: u64,
	},
	Answer {
		id: EventId,
		user: UserId,
		option: u32,
	},
	Close {
		id: EventId,
	},
}

/// The single live chat event of a room.
///
/// Only the process that opened the poll closes it and announces the result; the others hold a
/// replica fed by `PollOp` frames.
#[derive(Debug)]
pub struct Poll {
	pub id: EventId,
	pub author: String,
	pub title: String,
	pub options: Vec<String>,
	pub duration: Duration,
	owned: bool,
	tally: Vec<u32>,
	respondents: HashSet<UserId>,
	timer: Option<JoinHandle<()>>,
}

impl Poll {
	pub fn new(author: impl Into<String>, title: impl Into<String>, options: Vec<String>, duration: Duration) -> Self {
		Self::build(EventId::new_v4(), author.into(), title.into(), options, duration, true)
	}

	/// Mirror of a poll opened by another process.
	pub fn replica(op: &PollOp) -> Option<Self> {
		let PollOp::Open {
			id,
			author,
			title,
			options,
			duration_ms,
		} = op
		else {
			return None;
		};
		Some(Self::build(
			*id,
			author.clone(),
			title.clone(),
			options.clone(),
			Duration::from_millis(*duration_ms),
			false,
		))
	}

	fn build(id: EventId, author: String, title: String, options: Vec<String>, duration: Duration, owned: bool) -> Self {
		let tally = vec![0; options.len()];
		Self {
			id,
			author,
			title,
			options,
			duration,
			owned,
			tally,
			respondents: HashSet::new(),
			timer: None,
		}
	}

	/// True when this process opened the poll and owns its close.
	pub fn is_owned(&self) -> bool {
		self.owned
	}

	pub fn open_op(&self) -> PollOp {
		PollOp::Open {
			id: self.id,
			author: self.author.clone(),
			title: self.title.clone(),
			options: self.options.clone(),
			duration_ms: self.duration.as_millis() as u64,
		}
	}

	/// Attach the close timer; it is aborted when the poll is dropped.
	pub fn set_timer(&mut self, timer: JoinHandle<()>) {
		if let Some(old) = self.timer.replace(timer) {
			old.abort();
		}
	}

	/// Count one response per user.
	pub fn respond(&mut self, user: &UserId, option: u32, event_id: Option<&str>) -> Result<(), ResponseRejection> {
		if let Some(id) = event_id
			&& id.parse::<EventId>().ok() != Some(self.id)
		{
			return Err(ResponseRejection::WrongEvent);
		}

		let slot = self
			.tally
			.get_mut(option as usize)
			.ok_or(ResponseRejection::OutOfRange)?;

		if !self.respondents.insert(user.clone()) {
			return Err(ResponseRejection::AlreadyAnswered);
		}

		*slot += 1;
		Ok(())
	}

	pub fn tally(&self) -> &[u32] {
		&self.tally
	}

	pub fn respondent_count(&self) -> usize {
		self.respondents.len()
	}

	/// `event-poll` data announced when the poll opens.
	pub fn open_data(&self) -> serde_json::Value {
		json!({
			"id": self.id.to_string(),
			"author": self.author,
			"title": self.title,
			"options": self.options,
			"duration": self.duration.as_millis() as u64,
			"tally": self.tally,
		})
	}

	/// `event-close` data carrying the final tally.
	pub fn close_data(&self) -> serde_json::Value {
		json!({
			"id": self.id.to_string(),
			"title": self.title,
			"options": self.options,
			"tally": self.tally,
			"respondents": self.respondents.len(),
		})
	}
}

impl Drop for Poll {
	fn drop(&mut self) {
		if let Some(timer) = self.timer.take() {
			timer.abort();
		}
	}
}
