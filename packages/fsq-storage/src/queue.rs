use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use fsq_domain::{
	EnqueueOutcome, ErrorKind, FailureOutcome, ItemError, ItemState, QueueCounts, QueueItem,
	RetryPolicy, SearchRequest,
};

use crate::{
	Error, Result,
	db::Db,
	escalation,
	models::{ITEM_COLUMNS, QueueItemRow, history_labels, to_i32},
};

const ENQUEUE_ATTEMPTS: usize = 3;
const STALE_CLAIM_MESSAGE: &str = "claim expired before a verdict was recorded";

pub async fn enqueue(db: &Db, request: &SearchRequest, now: OffsetDateTime) -> Result<EnqueueOutcome> {
	let item = QueueItem::new(request.clone(), now);

	// The live item can complete between the insert and the lookup; try again in that case.
	for _ in 0..ENQUEUE_ATTEMPTS {
		let inserted: Option<Uuid> = sqlx::query_scalar(
			"\
INSERT INTO search_queue_items (
	item_id,
	fingerprint,
	query_text,
	query_context,
	priority,
	state,
	attempt,
	next_eligible_at,
	error_history,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, '{}', $7, $6)
ON CONFLICT (fingerprint) WHERE state <> 'COMPLETED' DO NOTHING
RETURNING item_id",
		)
		.bind(item.item_id)
		.bind(request.fingerprint())
		.bind(request.query().text.as_str())
		.bind(request.query().context.as_deref())
		.bind(request.priority().rank())
		.bind(now)
		.bind(request.created_at())
		.fetch_optional(&db.pool)
		.await?;

		if let Some(item_id) = inserted {
			return Ok(EnqueueOutcome::Inserted { item_id });
		}

		let existing: Option<Uuid> = sqlx::query_scalar(
			"SELECT item_id FROM search_queue_items WHERE fingerprint = $1 AND state <> 'COMPLETED'",
		)
		.bind(request.fingerprint())
		.fetch_optional(&db.pool)
		.await?;

		if let Some(item_id) = existing {
			return Ok(EnqueueOutcome::Duplicate { item_id });
		}
	}

	Err(Error::Conflict(format!(
		"Fingerprint {} kept changing state during enqueue.",
		request.fingerprint()
	)))
}

pub async fn claim_next(db: &Db, now: OffsetDateTime) -> Result<Option<QueueItem>> {
	let mut tx = db.pool.begin().await?;
	let candidate: Option<Uuid> = sqlx::query_scalar(
		"\
SELECT item_id
FROM search_queue_items
WHERE state = 'PENDING' AND next_eligible_at <= $1
ORDER BY priority ASC, next_eligible_at ASC, created_at ASC, item_id ASC
LIMIT 1
FOR UPDATE SKIP LOCKED",
	)
	.bind(now)
	.fetch_optional(&mut *tx)
	.await?;
	let Some(item_id) = candidate else {
		tx.commit().await?;

		return Ok(None);
	};
	let sql = format!(
		"\
UPDATE search_queue_items
SET state = 'IN_FLIGHT', claimed_at = $1, updated_at = $1
WHERE item_id = $2 AND state = 'PENDING'
RETURNING
	{ITEM_COLUMNS}"
	);
	let row: Option<QueueItemRow> =
		sqlx::query_as(&sql).bind(now).bind(item_id).fetch_optional(&mut *tx).await?;

	tx.commit().await?;

	row.map(QueueItem::try_from).transpose()
}

pub async fn record_success(db: &Db, item_id: Uuid, now: OffsetDateTime) -> Result<()> {
	let mut tx = db.pool.begin().await?;
	let mut item = lock_in_flight(&mut tx, item_id).await?;

	item.complete(now);
	write_item(&mut tx, &item, Some(now)).await?;
	tx.commit().await?;

	Ok(())
}

pub async fn record_failure(
	db: &Db,
	item_id: Uuid,
	error: ItemError,
	policy: &RetryPolicy,
	now: OffsetDateTime,
) -> Result<FailureOutcome> {
	let mut tx = db.pool.begin().await?;
	let mut item = lock_in_flight(&mut tx, item_id).await?;
	let outcome = fail_item(&mut tx, &mut item, error, policy, now).await?;

	tx.commit().await?;

	Ok(outcome)
}

pub async fn release(db: &Db, item_id: Uuid, now: OffsetDateTime) -> Result<()> {
	let mut tx = db.pool.begin().await?;
	let mut item = lock_in_flight(&mut tx, item_id).await?;

	item.release(now);
	write_item(&mut tx, &item, None).await?;
	tx.commit().await?;

	Ok(())
}

pub async fn defer(
	db: &Db,
	item_id: Uuid,
	until: OffsetDateTime,
	error: ItemError,
	now: OffsetDateTime,
) -> Result<()> {
	let mut tx = db.pool.begin().await?;
	let mut item = lock_in_flight(&mut tx, item_id).await?;

	item.defer(until, error, now);
	write_item(&mut tx, &item, None).await?;
	tx.commit().await?;

	Ok(())
}

/// Fails every claim older than `claimed_before` once, as a transient error.
pub async fn recover_stale(
	db: &Db,
	claimed_before: OffsetDateTime,
	policy: &RetryPolicy,
	now: OffsetDateTime,
) -> Result<Vec<FailureOutcome>> {
	let mut tx = db.pool.begin().await?;
	let sql = format!(
		"\
SELECT
	{ITEM_COLUMNS}
FROM search_queue_items
WHERE state = 'IN_FLIGHT' AND claimed_at < $1
ORDER BY claimed_at ASC
FOR UPDATE SKIP LOCKED"
	);
	let rows: Vec<QueueItemRow> =
		sqlx::query_as(&sql).bind(claimed_before).fetch_all(&mut *tx).await?;
	let mut outcomes = Vec::with_capacity(rows.len());

	for row in rows {
		let mut item = QueueItem::try_from(row)?;
		let error = ItemError::new(ErrorKind::Transient, STALE_CLAIM_MESSAGE);

		outcomes.push(fail_item(&mut tx, &mut item, error, policy, now).await?);
	}

	tx.commit().await?;

	Ok(outcomes)
}

pub async fn counts(db: &Db) -> Result<QueueCounts> {
	let rows: Vec<(String, i64)> =
		sqlx::query_as("SELECT state, COUNT(*) FROM search_queue_items GROUP BY state")
			.fetch_all(&db.pool)
			.await?;
	let mut counts = QueueCounts::default();

	for (state, count) in rows {
		let count = u64::try_from(count).unwrap_or_default();

		match ItemState::parse(&state) {
			Some(ItemState::Pending) => counts.pending = count,
			Some(ItemState::InFlight) => counts.in_flight = count,
			Some(ItemState::Escalated) => counts.escalated = count,
			Some(ItemState::Completed) => counts.completed = count,
			None => return Err(Error::InvalidState(format!("Unknown item state {state:?}."))),
		}
	}

	Ok(counts)
}

/// The live item holding `fingerprint`, if any.
pub async fn find(db: &Db, fingerprint: &str) -> Result<Option<QueueItem>> {
	let sql = format!(
		"\
SELECT
	{ITEM_COLUMNS}
FROM search_queue_items
WHERE fingerprint = $1 AND state <> 'COMPLETED'"
	);
	let row: Option<QueueItemRow> =
		sqlx::query_as(&sql).bind(fingerprint).fetch_optional(&db.pool).await?;

	row.map(QueueItem::try_from).transpose()
}

pub async fn purge_completed(db: &Db, before: OffsetDateTime) -> Result<u64> {
	let result = sqlx::query(
		"DELETE FROM search_queue_items WHERE state = 'COMPLETED' AND completed_at < $1",
	)
	.bind(before)
	.execute(&db.pool)
	.await?;

	Ok(result.rows_affected())
}

pub(crate) async fn lock_item(conn: &mut PgConnection, item_id: Uuid) -> Result<QueueItem> {
	let sql = format!(
		"\
SELECT
	{ITEM_COLUMNS}
FROM search_queue_items
WHERE item_id = $1
FOR UPDATE"
	);
	let row: Option<QueueItemRow> =
		sqlx::query_as(&sql).bind(item_id).fetch_optional(&mut *conn).await?;
	let row = row.ok_or_else(|| Error::NotFound(format!("Queue item {item_id}.")))?;

	QueueItem::try_from(row)
}

pub(crate) async fn write_item(
	conn: &mut PgConnection,
	item: &QueueItem,
	completed_at: Option<OffsetDateTime>,
) -> Result<()> {
	let (last_error_kind, last_error) = match &item.last_error {
		Some(error) => (Some(error.kind.as_str()), Some(error.message.as_str())),
		None => (None, None),
	};

	sqlx::query(
		"\
UPDATE search_queue_items
SET state = $1,
	attempt = $2,
	next_eligible_at = $3,
	last_error_kind = $4,
	last_error = $5,
	error_history = $6,
	first_failed_at = $7,
	claimed_at = $8,
	completed_at = $9,
	updated_at = $10
WHERE item_id = $11",
	)
	.bind(item.state.as_str())
	.bind(to_i32(item.attempt, "attempt")?)
	.bind(item.next_eligible_at)
	.bind(last_error_kind)
	.bind(last_error)
	.bind(history_labels(&item.error_history))
	.bind(item.first_failed_at)
	.bind(item.claimed_at)
	.bind(completed_at)
	.bind(item.updated_at)
	.bind(item.item_id)
	.execute(&mut *conn)
	.await?;

	Ok(())
}

async fn lock_in_flight(conn: &mut PgConnection, item_id: Uuid) -> Result<QueueItem> {
	let item = lock_item(conn, item_id).await?;

	if item.state != ItemState::InFlight {
		return Err(Error::Conflict(format!(
			"Queue item {item_id} is {} rather than IN_FLIGHT.",
			item.state
		)));
	}

	Ok(item)
}

async fn fail_item(
	conn: &mut PgConnection,
	item: &mut QueueItem,
	error: ItemError,
	policy: &RetryPolicy,
	now: OffsetDateTime,
) -> Result<FailureOutcome> {
	let outcome = item.apply_failure(error, policy, now);

	write_item(conn, item, None).await?;

	if let FailureOutcome::Escalated(record) = &outcome {
		escalation::insert(conn, record).await?;
	}

	Ok(outcome)
}
