use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	request::SearchRequest,
	retry::{ErrorKind, ItemError, RetryDecision, RetryPolicy},
};

/// `Pending <-> InFlight -> Completed`, or `InFlight -> Escalated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
	Pending,
	InFlight,
	Escalated,
	Completed,
}
impl ItemState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "PENDING",
			Self::InFlight => "IN_FLIGHT",
			Self::Escalated => "ESCALATED",
			Self::Completed => "COMPLETED",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"PENDING" => Some(Self::Pending),
			"IN_FLIGHT" => Some(Self::InFlight),
			"ESCALATED" => Some(Self::Escalated),
			"COMPLETED" => Some(Self::Completed),
			_ => None,
		}
	}

	/// Live items hold their fingerprint; a second enqueue is a duplicate.
	pub fn is_live(self) -> bool {
		!matches!(self, Self::Completed)
	}
}
impl Display for ItemState {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
	pub item_id: Uuid,
	pub request: SearchRequest,
	pub attempt: u32,
	pub next_eligible_at: OffsetDateTime,
	pub last_error: Option<ItemError>,
	pub error_history: Vec<ErrorKind>,
	pub first_failed_at: Option<OffsetDateTime>,
	pub claimed_at: Option<OffsetDateTime>,
	pub state: ItemState,
	pub updated_at: OffsetDateTime,
}
impl QueueItem {
	pub fn new(request: SearchRequest, now: OffsetDateTime) -> Self {
		Self {
			item_id: Uuid::new_v4(),
			request,
			attempt: 0,
			next_eligible_at: now,
			last_error: None,
			error_history: Vec::new(),
			first_failed_at: None,
			claimed_at: None,
			state: ItemState::Pending,
			updated_at: now,
		}
	}

	pub fn claim(&mut self, now: OffsetDateTime) {
		self.state = ItemState::InFlight;
		self.claimed_at = Some(now);
		self.updated_at = now;
	}

	/// Back to Pending exactly as it was before the claim.
	pub fn release(&mut self, now: OffsetDateTime) {
		self.state = ItemState::Pending;
		self.claimed_at = None;
		self.updated_at = now;
	}

	/// Reschedules without counting an attempt.
	pub fn defer(&mut self, until: OffsetDateTime, error: ItemError, now: OffsetDateTime) {
		self.state = ItemState::Pending;
		self.claimed_at = None;
		self.next_eligible_at = until.max(now);
		self.last_error = Some(error);
		self.updated_at = now;
	}

	pub fn complete(&mut self, now: OffsetDateTime) {
		self.state = ItemState::Completed;
		self.claimed_at = None;
		self.updated_at = now;
	}

	/// Counts a failed attempt and either schedules the retry or escalates.
	pub fn apply_failure(
		&mut self,
		error: ItemError,
		policy: &RetryPolicy,
		now: OffsetDateTime,
	) -> FailureOutcome {
		self.attempt = self.attempt.saturating_add(1);
		self.error_history.push(error.kind);
		self.first_failed_at.get_or_insert(now);
		self.last_error = Some(error);
		self.claimed_at = None;
		self.updated_at = now;

		match policy.decide(self.request.fingerprint(), self.attempt, now) {
			RetryDecision::Retry { next_eligible_at } => {
				self.state = ItemState::Pending;
				self.next_eligible_at = next_eligible_at.max(self.next_eligible_at);

				FailureOutcome::Retried {
					attempt: self.attempt,
					next_eligible_at: self.next_eligible_at,
				}
			},
			RetryDecision::Escalate => {
				self.state = ItemState::Escalated;

				FailureOutcome::Escalated(EscalationRecord::from_item(self, now))
			},
		}
	}

	/// Operator retry of an escalated item: a clean slate, eligible immediately.
	pub fn reset_for_requeue(&mut self, now: OffsetDateTime) {
		self.state = ItemState::Pending;
		self.attempt = 0;
		self.error_history.clear();
		self.first_failed_at = None;
		self.claimed_at = None;
		self.next_eligible_at = now;
		self.updated_at = now;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
	Inserted { item_id: Uuid },
	Duplicate { item_id: Uuid },
}
impl EnqueueOutcome {
	pub fn item_id(self) -> Uuid {
		match self {
			Self::Inserted { item_id } | Self::Duplicate { item_id } => item_id,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
	Retried { attempt: u32, next_eligible_at: OffsetDateTime },
	Escalated(EscalationRecord),
}

/// Human-review record for an item that exhausted automatic retries.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationRecord {
	pub item_id: Uuid,
	pub request: SearchRequest,
	pub total_attempts: u32,
	pub first_failed_at: OffsetDateTime,
	pub last_failed_at: OffsetDateTime,
	pub history: Vec<ErrorKind>,
	pub last_error: Option<ItemError>,
	pub escalated_at: OffsetDateTime,
}
impl EscalationRecord {
	pub fn from_item(item: &QueueItem, now: OffsetDateTime) -> Self {
		Self {
			item_id: item.item_id,
			request: item.request.clone(),
			total_attempts: item.attempt,
			first_failed_at: item.first_failed_at.unwrap_or(now),
			last_failed_at: now,
			history: item.error_history.clone(),
			last_error: item.last_error.clone(),
			escalated_at: now,
		}
	}

	pub fn fingerprint(&self) -> &str {
		self.request.fingerprint()
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
	pub pending: u64,
	pub in_flight: u64,
	pub escalated: u64,
	pub completed: u64,
}
impl QueueCounts {
	pub fn total(&self) -> u64 {
		self.pending + self.in_flight + self.escalated + self.completed
	}
}
