use time::OffsetDateTime;

use fsq_domain::CircuitBreakerState;

use crate::{
	Result,
	db::Db,
	models::{BreakerRow, to_i32},
};

pub async fn load(db: &Db, breaker_id: &str) -> Result<Option<CircuitBreakerState>> {
	let row: Option<BreakerRow> = sqlx::query_as(
		"\
SELECT status, consecutive_failures, opened_at, cooldown_ms
FROM circuit_breaker_state
WHERE breaker_id = $1",
	)
	.bind(breaker_id)
	.fetch_optional(&db.pool)
	.await?;

	row.map(CircuitBreakerState::try_from).transpose()
}

pub async fn save(
	db: &Db,
	breaker_id: &str,
	state: &CircuitBreakerState,
	now: OffsetDateTime,
) -> Result<()> {
	let cooldown_ms = i64::try_from(state.cooldown.whole_milliseconds()).unwrap_or(i64::MAX);

	sqlx::query(
		"\
INSERT INTO circuit_breaker_state (
	breaker_id,
	status,
	consecutive_failures,
	opened_at,
	cooldown_ms,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (breaker_id) DO UPDATE
SET status = EXCLUDED.status,
	consecutive_failures = EXCLUDED.consecutive_failures,
	opened_at = EXCLUDED.opened_at,
	cooldown_ms = EXCLUDED.cooldown_ms,
	updated_at = EXCLUDED.updated_at",
	)
	.bind(breaker_id)
	.bind(state.status.as_str())
	.bind(to_i32(state.consecutive_failures, "consecutive_failures")?)
	.bind(state.opened_at)
	.bind(cooldown_ms)
	.bind(now)
	.execute(&db.pool)
	.await?;

	Ok(())
}
