use time::OffsetDateTime;
use uuid::Uuid;

use fsq_domain::{
	CircuitBreakerState, CircuitStatus, ErrorKind, EscalationRecord, ItemError, ItemState,
	Priority, QueueItem, QuotaWindow, SearchQuery, SearchRequest,
};

use crate::{Error, Result};

pub const ITEM_COLUMNS: &str = "\
item_id,
	fingerprint,
	query_text,
	query_context,
	priority,
	state,
	attempt,
	next_eligible_at,
	last_error_kind,
	last_error,
	error_history,
	first_failed_at,
	claimed_at,
	created_at,
	updated_at";

pub const ESCALATION_COLUMNS: &str = "\
fingerprint,
	item_id,
	query_text,
	query_context,
	priority,
	request_created_at,
	total_attempts,
	first_failed_at,
	last_failed_at,
	history,
	last_error_kind,
	last_error,
	escalated_at";

#[derive(Debug, sqlx::FromRow)]
pub struct QueueItemRow {
	pub item_id: Uuid,
	pub fingerprint: String,
	pub query_text: String,
	pub query_context: Option<String>,
	pub priority: i16,
	pub state: String,
	pub attempt: i32,
	pub next_eligible_at: OffsetDateTime,
	pub last_error_kind: Option<String>,
	pub last_error: Option<String>,
	pub error_history: Vec<String>,
	pub first_failed_at: Option<OffsetDateTime>,
	pub claimed_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
impl TryFrom<QueueItemRow> for QueueItem {
	type Error = Error;

	fn try_from(row: QueueItemRow) -> Result<Self> {
		let state = ItemState::parse(&row.state)
			.ok_or_else(|| Error::InvalidState(format!("Unknown item state {:?}.", row.state)))?;
		let request = SearchRequest::from_parts(
			row.fingerprint,
			SearchQuery::new(row.query_text, row.query_context),
			parse_priority(row.priority)?,
			row.created_at,
		);

		Ok(Self {
			item_id: row.item_id,
			request,
			attempt: to_u32(row.attempt, "attempt")?,
			next_eligible_at: row.next_eligible_at,
			last_error: parse_error(row.last_error_kind, row.last_error)?,
			error_history: parse_history(&row.error_history)?,
			first_failed_at: row.first_failed_at,
			claimed_at: row.claimed_at,
			state,
			updated_at: row.updated_at,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct EscalationRow {
	pub fingerprint: String,
	pub item_id: Uuid,
	pub query_text: String,
	pub query_context: Option<String>,
	pub priority: i16,
	pub request_created_at: OffsetDateTime,
	pub total_attempts: i32,
	pub first_failed_at: OffsetDateTime,
	pub last_failed_at: OffsetDateTime,
	pub history: Vec<String>,
	pub last_error_kind: Option<String>,
	pub last_error: Option<String>,
	pub escalated_at: OffsetDateTime,
}
impl TryFrom<EscalationRow> for EscalationRecord {
	type Error = Error;

	fn try_from(row: EscalationRow) -> Result<Self> {
		let request = SearchRequest::from_parts(
			row.fingerprint,
			SearchQuery::new(row.query_text, row.query_context),
			parse_priority(row.priority)?,
			row.request_created_at,
		);

		Ok(Self {
			item_id: row.item_id,
			request,
			total_attempts: to_u32(row.total_attempts, "total_attempts")?,
			first_failed_at: row.first_failed_at,
			last_failed_at: row.last_failed_at,
			history: parse_history(&row.history)?,
			last_error: parse_error(row.last_error_kind, row.last_error)?,
			escalated_at: row.escalated_at,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct BreakerRow {
	pub status: String,
	pub consecutive_failures: i32,
	pub opened_at: Option<OffsetDateTime>,
	pub cooldown_ms: i64,
}
impl TryFrom<BreakerRow> for CircuitBreakerState {
	type Error = Error;

	fn try_from(row: BreakerRow) -> Result<Self> {
		Ok(Self {
			status: CircuitStatus::parse(&row.status),
			consecutive_failures: to_u32(row.consecutive_failures, "consecutive_failures")?,
			opened_at: row.opened_at,
			cooldown: time::Duration::milliseconds(row.cooldown_ms),
			trial_in_flight: false,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct QuotaRow {
	pub window_start: OffsetDateTime,
	pub consumed: i32,
}
impl TryFrom<QuotaRow> for QuotaWindow {
	type Error = Error;

	fn try_from(row: QuotaRow) -> Result<Self> {
		Ok(Self { window_start: row.window_start, consumed: to_u32(row.consumed, "consumed")? })
	}
}

pub fn history_labels(history: &[ErrorKind]) -> Vec<String> {
	history.iter().map(|kind| kind.as_str().to_string()).collect()
}

pub fn to_i32(value: u32, label: &str) -> Result<i32> {
	i32::try_from(value).map_err(|_| Error::InvalidArgument(format!("{label} is out of range.")))
}

fn to_u32(value: i32, label: &str) -> Result<u32> {
	u32::try_from(value).map_err(|_| Error::InvalidState(format!("Negative {label}: {value}.")))
}

fn parse_priority(rank: i16) -> Result<Priority> {
	Priority::from_rank(rank)
		.ok_or_else(|| Error::InvalidState(format!("Unknown priority rank {rank}.")))
}

fn parse_history(labels: &[String]) -> Result<Vec<ErrorKind>> {
	labels
		.iter()
		.map(|label| {
			ErrorKind::parse(label)
				.ok_or_else(|| Error::InvalidState(format!("Unknown error kind {label:?}.")))
		})
		.collect()
}

fn parse_error(kind: Option<String>, message: Option<String>) -> Result<Option<ItemError>> {
	let Some(kind) = kind else {
		return Ok(None);
	};
	let kind = ErrorKind::parse(&kind)
		.ok_or_else(|| Error::InvalidState(format!("Unknown error kind {kind:?}.")))?;

	Ok(Some(ItemError { kind, message: message.unwrap_or_default() }))
}
