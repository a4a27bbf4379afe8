//! Circuit breaker state machine.
//!
//! ```text
//! Closed --(failure_threshold consecutive failures)--> Open
//! Open --(cooldown elapsed, next acquire)--> HalfOpen (one trial)
//! HalfOpen --success--> Closed
//! HalfOpen --failure--> Open (cooldown doubled, capped)
//! ```
//!
//! The state is plain data so it can be snapshotted to storage; callers serialize access.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
	#[default]
	Closed,
	Open,
	HalfOpen,
}
impl CircuitStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Closed => "closed",
			Self::Open => "open",
			Self::HalfOpen => "half_open",
		}
	}

	/// Unknown labels map to `Open`, the safest state.
	pub fn parse(raw: &str) -> Self {
		match raw {
			"closed" => Self::Closed,
			"half_open" => Self::HalfOpen,
			_ => Self::Open,
		}
	}
}
impl Display for CircuitStatus {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
	pub failure_threshold: u32,
	pub cooldown: Duration,
	pub max_cooldown: Duration,
}
impl CircuitPolicy {
	pub fn from_config(cfg: &fsq_config::Circuit) -> Self {
		Self {
			failure_threshold: cfg.failure_threshold.max(1),
			cooldown: Duration::milliseconds(i64::try_from(cfg.cooldown_ms).unwrap_or(i64::MAX)),
			max_cooldown: Duration::milliseconds(
				i64::try_from(cfg.max_cooldown_ms).unwrap_or(i64::MAX),
			),
		}
	}
}
impl Default for CircuitPolicy {
	fn default() -> Self {
		Self::from_config(&fsq_config::Circuit::default())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
	/// Closed circuit; call freely.
	Allowed,
	/// The single half-open trial. Must end in a recorded outcome or `release_trial`.
	Trial,
	/// `until` is when the cooldown ends, if known.
	Rejected { until: Option<OffsetDateTime> },
}
impl Permit {
	pub fn is_permitted(self) -> bool {
		!matches!(self, Self::Rejected { .. })
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
	pub status: CircuitStatus,
	pub consecutive_failures: u32,
	pub opened_at: Option<OffsetDateTime>,
	pub cooldown: Duration,
	/// Not persisted. A recovered snapshot never has a trial outstanding.
	pub trial_in_flight: bool,
}
impl CircuitBreakerState {
	pub fn new(policy: &CircuitPolicy) -> Self {
		Self {
			status: CircuitStatus::Closed,
			consecutive_failures: 0,
			opened_at: None,
			cooldown: policy.cooldown,
			trial_in_flight: false,
		}
	}

	pub fn reopens_at(&self) -> Option<OffsetDateTime> {
		match self.status {
			CircuitStatus::Open =>
				self.opened_at.map(|opened_at| opened_at.saturating_add(self.cooldown)),
			_ => None,
		}
	}

	/// Decides whether a call may be attempted at `now`, moving Open to HalfOpen once the
	/// cooldown has elapsed.
	pub fn acquire(&mut self, now: OffsetDateTime) -> Permit {
		match self.status {
			CircuitStatus::Closed => Permit::Allowed,
			CircuitStatus::Open => {
				let reopens_at = self.reopens_at();

				match reopens_at {
					Some(at) if now < at => Permit::Rejected { until: Some(at) },
					_ => {
						self.status = CircuitStatus::HalfOpen;
						self.trial_in_flight = true;

						Permit::Trial
					},
				}
			},
			CircuitStatus::HalfOpen =>
				if self.trial_in_flight {
					Permit::Rejected { until: None }
				} else {
					self.trial_in_flight = true;

					Permit::Trial
				},
		}
	}

	/// Gives the half-open trial back without a verdict.
	pub fn release_trial(&mut self) {
		self.trial_in_flight = false;
	}

	pub fn record_success(&mut self, policy: &CircuitPolicy) {
		match self.status {
			CircuitStatus::Closed => {
				self.consecutive_failures = 0;
			},
			CircuitStatus::HalfOpen => {
				self.status = CircuitStatus::Closed;
				self.consecutive_failures = 0;
				self.opened_at = None;
				self.cooldown = policy.cooldown;
				self.trial_in_flight = false;
			},
			CircuitStatus::Open => {},
		}
	}

	pub fn record_failure(&mut self, policy: &CircuitPolicy, now: OffsetDateTime) {
		self.consecutive_failures = self.consecutive_failures.saturating_add(1);

		match self.status {
			CircuitStatus::Closed =>
				if self.consecutive_failures >= policy.failure_threshold {
					self.status = CircuitStatus::Open;
					self.opened_at = Some(now);
				},
			CircuitStatus::HalfOpen => {
				self.status = CircuitStatus::Open;
				self.opened_at = Some(now);
				self.cooldown = (self.cooldown * 2_i32).min(policy.max_cooldown);
				self.trial_in_flight = false;
			},
			CircuitStatus::Open => {},
		}
	}
}
