#![forbid(unsafe_code)]

//! Human duration strings used by moderation and poll commands (`"30s"`, `"10m"`, `"2h"`, `"1mo"`).

use std::time::Duration;

use thiserror::Error;

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;
const WEEK_MS: u64 = 7 * DAY_MS;
const MONTH_MS: u64 = 31 * DAY_MS;
const YEAR_MS: u64 = 365 * DAY_MS;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseDurationError {
	#[error("empty duration")]
	Empty,
	#[error("missing amount in duration: {0}")]
	MissingAmount(String),
	#[error("missing unit in duration: {0}")]
	MissingUnit(String),
	#[error("unknown duration unit: {0}")]
	UnknownUnit(String),
	#[error("duration must be greater than zero")]
	Zero,
	#[error("duration too large: {0}")]
	Overflow(String),
}

fn unit_ms(unit: &str) -> Option<u64> {
	match unit {
		"s" => Some(SECOND_MS),
		"m" => Some(MINUTE_MS),
		"h" => Some(HOUR_MS),
		"d" => Some(DAY_MS),
		"w" => Some(WEEK_MS),
		"mo" => Some(MONTH_MS),
		"y" => Some(YEAR_MS),
		_ => None,
	}
}

/// Parse `<amount><unit>` into a `Duration`.
pub fn parse_duration(s: &str) -> Result<Duration, ParseDurationError> {
	let s = s.trim().to_ascii_lowercase();
	if s.is_empty() {
		return Err(ParseDurationError::Empty);
	}

	let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
	let (amount_s, unit) = s.split_at(split);

	if amount_s.is_empty() {
		return Err(ParseDurationError::MissingAmount(s.clone()));
	}
	if unit.is_empty() {
		return Err(ParseDurationError::MissingUnit(s.clone()));
	}

	let multiplier = unit_ms(unit).ok_or_else(|| ParseDurationError::UnknownUnit(unit.to_string()))?;
	let amount: u64 = amount_s
		.parse()
		.map_err(|_| ParseDurationError::Overflow(s.clone()))?;
	if amount == 0 {
		return Err(ParseDurationError::Zero);
	}

	let ms = amount
		.checked_mul(multiplier)
		.ok_or_else(|| ParseDurationError::Overflow(s.clone()))?;
	Ok(Duration::from_millis(ms))
}

/// Render a duration with its two most significant units (`"1d 2h"`, `"9m 59s"`).
pub fn format_duration(d: Duration) -> String {
	let mut ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
	if ms < SECOND_MS {
		return "less than a second".to_string();
	}

	let units = [
		(YEAR_MS, "y"),
		(DAY_MS, "d"),
		(HOUR_MS, "h"),
		(MINUTE_MS, "m"),
		(SECOND_MS, "s"),
	];

	let mut parts = Vec::with_capacity(2);
	for (unit, suffix) in units {
		if parts.len() == 2 {
			break;
		}
		let n = ms / unit;
		if n > 0 {
			parts.push(format!("{n}{suffix}"));
			ms -= n * unit;
		} else if !parts.is_empty() {
			break;
		}
	}

	parts.join(" ")
}
