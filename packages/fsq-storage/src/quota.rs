use sqlx::PgConnection;
use time::OffsetDateTime;

use fsq_domain::QuotaWindow;

use crate::{
	Result,
	db::Db,
	models::{QuotaRow, to_i32},
};

/// Spends one unit of the current window iff it has budget left. The increment is a single
/// conditional update, so concurrent callers can never push `consumed` past `daily_limit`.
pub async fn try_consume(db: &Db, daily_limit: u32, now: OffsetDateTime) -> Result<bool> {
	let mut tx = db.pool.begin().await?;
	let window = current_window(&mut tx, now, true).await?;

	sqlx::query(
		"\
INSERT INTO quota_windows (window_start, consumed, updated_at)
VALUES ($1, 0, $2)
ON CONFLICT (window_start) DO NOTHING",
	)
	.bind(window.window_start)
	.bind(now)
	.execute(&mut *tx)
	.await?;

	let consumed: Option<i32> = sqlx::query_scalar(
		"\
UPDATE quota_windows
SET consumed = consumed + 1, updated_at = $2
WHERE window_start = $1 AND consumed < $3
RETURNING consumed",
	)
	.bind(window.window_start)
	.bind(now)
	.bind(to_i32(daily_limit, "daily_limit")?)
	.fetch_optional(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(consumed.is_some())
}

pub async fn snapshot(db: &Db, now: OffsetDateTime) -> Result<QuotaWindow> {
	let mut conn = db.pool.acquire().await?;

	current_window(&mut conn, now, false).await
}

/// The newest stored window, rolled forward to `now`. A clock behind the newest window keeps it.
async fn current_window(
	conn: &mut PgConnection,
	now: OffsetDateTime,
	lock: bool,
) -> Result<QuotaWindow> {
	let sql = if lock {
		"SELECT window_start, consumed FROM quota_windows ORDER BY window_start DESC LIMIT 1 FOR UPDATE"
	} else {
		"SELECT window_start, consumed FROM quota_windows ORDER BY window_start DESC LIMIT 1"
	};
	let row: Option<QuotaRow> = sqlx::query_as(sql).fetch_optional(&mut *conn).await?;
	let mut window = match row {
		Some(row) => QuotaWindow::try_from(row)?,
		None => QuotaWindow::starting_at(now),
	};

	window.roll(now);

	Ok(window)
}
