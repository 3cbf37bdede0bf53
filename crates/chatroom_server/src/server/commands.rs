#![forbid(unsafe_code)]

use std::time::Duration;

use chatroom_domain::{ParseDurationError, parse_duration};
use thiserror::Error;

pub const MAX_POLL_OPTIONS: usize = 10;

/// Privileged chat command, parsed from `/name args...` or `!name args...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Poll {
		duration: Duration,
		title: String,
		options: Vec<String>,
	},
	Ban {
		target: String,
		duration: Duration,
		reason: String,
	},
	IpBan {
		target: String,
		duration: Duration,
		reason: String,
	},
	Timeout {
		target: String,
		duration: Duration,
		reason: String,
	},
	Nuke {
		phrase: String,
		duration: Option<Duration>,
	},
	Unban {
		target: String,
	},
	Untimeout {
		target: String,
	},
	Unnuke {
		phrase: String,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
	#[error("Invalid Command")]
	Unknown(String),

	#[error("Invalid argument length")]
	InvalidArgumentLength,

	#[error("Invalid duration: {0}")]
	InvalidDuration(#[from] ParseDurationError),

	#[error("Too many poll options (max {MAX_POLL_OPTIONS})")]
	TooManyOptions,
}

impl Command {
	pub fn parse(input: &str) -> Result<Self, CommandError> {
		let input = input.trim();
		let Some(body) = input.strip_prefix(['/', '!']) else {
			return Err(CommandError::Unknown(input.to_string()));
		};

		let mut tokens = tokenize(body);
		if tokens.is_empty() {
			return Err(CommandError::Unknown(input.to_string()));
		}
		let name = tokens.remove(0).to_ascii_lowercase();
		let args = tokens;

		match name.as_str() {
			"poll" => {
				if args.len() < 3 {
					return Err(CommandError::InvalidArgumentLength);
				}
				let duration = parse_duration(&args[0])?;
				let title = args[1].clone();
				let options = args[2..].to_vec();
				if title.trim().is_empty() || options.iter().any(|o| o.trim().is_empty()) {
					return Err(CommandError::InvalidArgumentLength);
				}
				if options.len() > MAX_POLL_OPTIONS {
					return Err(CommandError::TooManyOptions);
				}
				Ok(Command::Poll {
					duration,
					title,
					options,
				})
			}
			"ban" | "ipban" | "timeout" => {
				if args.len() < 3 {
					return Err(CommandError::InvalidArgumentLength);
				}
				let duration = parse_duration(&args[1])?;
				let target = args[0].clone();
				let reason = args[2..].join(" ");
				Ok(match name.as_str() {
					"ban" => Command::Ban {
						target,
						duration,
						reason,
					},
					"ipban" => Command::IpBan {
						target,
						duration,
						reason,
					},
					_ => Command::Timeout {
						target,
						duration,
						reason,
					},
				})
			}
			"nuke" => {
				if args.is_empty() || args.len() > 2 {
					return Err(CommandError::InvalidArgumentLength);
				}
				let duration = args.get(1).map(|d| parse_duration(d)).transpose()?;
				Ok(Command::Nuke {
					phrase: args[0].clone(),
					duration,
				})
			}
			"unban" | "untimeout" | "unnuke" => {
				if args.len() != 1 {
					return Err(CommandError::InvalidArgumentLength);
				}
				let arg = args[0].clone();
				Ok(match name.as_str() {
					"unban" => Command::Unban { target: arg },
					"untimeout" => Command::Untimeout { target: arg },
					_ => Command::Unnuke { phrase: arg },
				})
			}
			_ => Err(CommandError::Unknown(name)),
		}
	}

	/// Stable name used for logs, metrics and the audit trail.
	pub fn kind(&self) -> &'static str {
		match self {
			Command::Poll { .. } => "poll",
			Command::Ban { .. } => "ban",
			Command::IpBan { .. } => "ipban",
			Command::Timeout { .. } => "timeout",
			Command::Nuke { .. } => "nuke",
			Command::Unban { .. } => "unban",
			Command::Untimeout { .. } => "untimeout",
			Command::Unnuke { .. } => "unnuke",
		}
	}
}

/// Split on whitespace; a `"quoted span"` forms one token (an unterminated quote runs to the end).
pub fn tokenize(input: &str) -> Vec<String> {
	let mut tokens = Vec::new();
	let mut current = String::new();
	let mut in_quote = false;
	let mut quoted_token = false;

	for c in input.chars() {
		match c {
			'"' => {
				in_quote = !in_quote;
				quoted_token = true;
			}
			c if c.is_whitespace() && !in_quote => {
				if !current.is_empty() || quoted_token {
					tokens.push(std::mem::take(&mut current));
				}
				quoted_token = false;
			}
			c => current.push(c),
		}
	}

	if !current.is_empty() || quoted_token {
		tokens.push(current);
	}
	tokens
}
