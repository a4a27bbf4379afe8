use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use fsq_domain::{EscalationRecord, ItemState};

use crate::{
	Error, Result,
	db::Db,
	models::{ESCALATION_COLUMNS, EscalationRow, history_labels, to_i32},
	queue,
};

/// Idempotent by fingerprint. Runs inside the failure transaction that escalated the item.
pub(crate) async fn insert(conn: &mut PgConnection, record: &EscalationRecord) -> Result<()> {
	let request = &record.request;
	let (last_error_kind, last_error) = match &record.last_error {
		Some(error) => (Some(error.kind.as_str()), Some(error.message.as_str())),
		None => (None, None),
	};

	sqlx::query(
		"\
INSERT INTO escalation_records (
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
	escalated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
ON CONFLICT (fingerprint) DO NOTHING",
	)
	.bind(request.fingerprint())
	.bind(record.item_id)
	.bind(request.query().text.as_str())
	.bind(request.query().context.as_deref())
	.bind(request.priority().rank())
	.bind(request.created_at())
	.bind(to_i32(record.total_attempts, "total_attempts")?)
	.bind(record.first_failed_at)
	.bind(record.last_failed_at)
	.bind(history_labels(&record.history))
	.bind(last_error_kind)
	.bind(last_error)
	.bind(record.escalated_at)
	.execute(&mut *conn)
	.await?;

	Ok(())
}

pub async fn list(db: &Db, limit: u32) -> Result<Vec<EscalationRecord>> {
	let sql = format!(
		"\
SELECT
	{ESCALATION_COLUMNS}
FROM escalation_records
ORDER BY escalated_at ASC, fingerprint ASC
LIMIT $1"
	);
	let rows: Vec<EscalationRow> =
		sqlx::query_as(&sql).bind(i64::from(limit)).fetch_all(&db.pool).await?;

	rows.into_iter().map(EscalationRecord::try_from).collect()
}

pub async fn get(db: &Db, fingerprint: &str) -> Result<Option<EscalationRecord>> {
	let sql = format!(
		"\
SELECT
	{ESCALATION_COLUMNS}
FROM escalation_records
WHERE fingerprint = $1"
	);
	let row: Option<EscalationRow> =
		sqlx::query_as(&sql).bind(fingerprint).fetch_optional(&db.pool).await?;

	row.map(EscalationRecord::try_from).transpose()
}

/// Drops the record and its escalated item. `None` when no record exists.
pub async fn resolve(db: &Db, fingerprint: &str) -> Result<Option<Uuid>> {
	let mut tx = db.pool.begin().await?;
	let Some(item_id) = take_record(&mut tx, fingerprint).await? else {
		tx.commit().await?;

		return Ok(None);
	};

	sqlx::query("DELETE FROM search_queue_items WHERE item_id = $1 AND state = 'ESCALATED'")
		.bind(item_id)
		.execute(&mut *tx)
		.await?;
	tx.commit().await?;

	Ok(Some(item_id))
}

/// Drops the record and puts its item back in the queue with a clean retry history.
pub async fn requeue(db: &Db, fingerprint: &str, now: OffsetDateTime) -> Result<Option<Uuid>> {
	let mut tx = db.pool.begin().await?;
	let Some(item_id) = take_record(&mut tx, fingerprint).await? else {
		tx.commit().await?;

		return Ok(None);
	};
	let mut item = queue::lock_item(&mut tx, item_id).await?;

	if item.state != ItemState::Escalated {
		return Err(Error::Conflict(format!(
			"Queue item {item_id} is {} rather than ESCALATED.",
			item.state
		)));
	}

	item.reset_for_requeue(now);
	queue::write_item(&mut tx, &item, None).await?;
	tx.commit().await?;

	Ok(Some(item_id))
}

async fn take_record(conn: &mut PgConnection, fingerprint: &str) -> Result<Option<Uuid>> {
	let item_id: Option<Uuid> = sqlx::query_scalar(
		"DELETE FROM escalation_records WHERE fingerprint = $1 RETURNING item_id",
	)
	.bind(fingerprint)
	.fetch_optional(&mut *conn)
	.await?;

	Ok(item_id)
}
