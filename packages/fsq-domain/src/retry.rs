use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

const MAX_ERROR_CHARS: usize = 1_024;
const SECRET_KEYS: [&str; 5] = ["api_key", "apikey", "password", "secret", "token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// Network or provider hiccup. Retried on the backoff schedule.
	Transient,
	/// The provider reported its own limit. Deferred without counting an attempt.
	Quota,
	/// The provider claims the query can never succeed. Still retried, since the signal is not
	/// trusted.
	Permanent,
}
impl ErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Transient => "transient",
			Self::Quota => "quota",
			Self::Permanent => "permanent",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"transient" => Some(Self::Transient),
			"quota" => Some(Self::Quota),
			"permanent" => Some(Self::Permanent),
			_ => None,
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
	pub kind: ErrorKind,
	pub message: String,
}
impl ItemError {
	/// Redacts credential-looking tokens and truncates the message before it is persisted.
	pub fn new(kind: ErrorKind, message: impl AsRef<str>) -> Self {
		Self { kind, message: sanitize_error_message(message.as_ref()) }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
	Retry { next_eligible_at: OffsetDateTime },
	Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
	pub escalation_threshold: u32,
	pub base: Duration,
	pub max: Duration,
	pub jitter_ratio: f64,
}
impl RetryPolicy {
	pub fn from_config(cfg: &fsq_config::Retry) -> Self {
		Self {
			escalation_threshold: cfg.escalation_threshold,
			base: Duration::milliseconds(saturating_i64(cfg.backoff_base_ms)),
			max: Duration::milliseconds(saturating_i64(cfg.backoff_max_ms)),
			jitter_ratio: cfg.jitter_ratio,
		}
	}

	/// `min(base * 2^(attempt-1), max)`. Non-decreasing in `attempt`.
	pub fn nominal_backoff(&self, attempt: u32) -> Duration {
		let exp = attempt.max(1).saturating_sub(1).min(62);
		let base_ms = self.base.whole_milliseconds().clamp(0, i64::MAX as i128) as i64;
		let max_ms = self.max.whole_milliseconds().clamp(0, i64::MAX as i128) as i64;
		let scaled = base_ms.saturating_mul(2_i64.saturating_pow(exp));

		Duration::milliseconds(scaled.min(max_ms))
	}

	/// Nominal backoff spread by up to `jitter_ratio` in either direction. The spread is derived
	/// from the fingerprint and attempt so items sharing a schedule fan out while each item's
	/// schedule stays reproducible. Never exceeds `max`.
	pub fn backoff(&self, fingerprint: &str, attempt: u32) -> Duration {
		let nominal = self.nominal_backoff(attempt);

		if self.jitter_ratio <= 0.0 {
			return nominal;
		}

		let max_ms = self.max.whole_milliseconds() as f64;
		let nominal_ms = nominal.whole_milliseconds() as f64;
		let factor = 1.0 + jitter_unit(fingerprint, attempt) * self.jitter_ratio;
		let jittered = (nominal_ms * factor).clamp(0.0, max_ms);

		Duration::milliseconds(jittered.round() as i64)
	}

	/// `attempt` is the count after the failure being recorded.
	pub fn decide(&self, fingerprint: &str, attempt: u32, now: OffsetDateTime) -> RetryDecision {
		if attempt >= self.escalation_threshold {
			return RetryDecision::Escalate;
		}

		let backoff = self.backoff(fingerprint, attempt);

		RetryDecision::Retry { next_eligible_at: now.saturating_add(backoff) }
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::from_config(&fsq_config::Retry::default())
	}
}

/// Maps `(fingerprint, attempt)` onto `[-1.0, 1.0]`.
fn jitter_unit(fingerprint: &str, attempt: u32) -> f64 {
	let mut hasher = blake3::Hasher::new();

	hasher.update(fingerprint.as_bytes());
	hasher.update(&attempt.to_le_bytes());

	let digest = hasher.finalize();
	let mut bytes = [0_u8; 8];

	bytes.copy_from_slice(&digest.as_bytes()[..8]);

	let unit = u64::from_le_bytes(bytes) as f64 / u64::MAX as f64;

	unit * 2.0 - 1.0
}

fn saturating_i64(value: u64) -> i64 {
	i64::try_from(value).unwrap_or(i64::MAX)
}

fn sanitize_error_message(text: &str) -> String {
	let mut parts = Vec::new();
	let mut redact_next = false;

	for raw in text.split_whitespace() {
		let mut word = raw.to_string();

		if redact_next {
			word = "[REDACTED]".to_string();
			redact_next = false;
		}
		if raw.eq_ignore_ascii_case("bearer") {
			redact_next = true;
		}

		let lowered = raw.to_ascii_lowercase();

		for key in SECRET_KEYS {
			if lowered.contains(key) && (lowered.contains('=') || lowered.contains(':')) {
				let sep = if raw.contains('=') { '=' } else { ':' };
				let prefix = raw.split(sep).next().unwrap_or(raw);

				word = format!("{prefix}{sep}[REDACTED]");

				break;
			}
		}

		parts.push(word);
	}

	let mut out = parts.join(" ");

	if out.chars().count() > MAX_ERROR_CHARS {
		out = out.chars().take(MAX_ERROR_CHARS).collect();
		out.push_str("...");
	}

	out
}
