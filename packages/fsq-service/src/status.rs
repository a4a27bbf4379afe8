use serde::Serialize;
use time::OffsetDateTime;

use fsq_domain::{CircuitBreakerState, CircuitPolicy, CircuitStatus, QueueCounts};

use crate::{BREAKER_ID, FallbackSearchService, Result};

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
	pub queue: QueueCounts,
	pub quota: QuotaView,
	pub circuit: CircuitView,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaView {
	pub daily_limit: u32,
	pub consumed: u32,
	pub usage_fraction: f64,
	#[serde(with = "crate::time_serde")]
	pub window_start: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub window_end: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitView {
	pub status: CircuitStatus,
	pub consecutive_failures: u32,
	#[serde(with = "crate::time_serde::option")]
	pub opened_at: Option<OffsetDateTime>,
	#[serde(with = "crate::time_serde::option")]
	pub reopens_at: Option<OffsetDateTime>,
	pub cooldown_ms: i64,
}
impl From<&CircuitBreakerState> for CircuitView {
	fn from(state: &CircuitBreakerState) -> Self {
		Self {
			status: state.status,
			consecutive_failures: state.consecutive_failures,
			opened_at: state.opened_at,
			reopens_at: state.reopens_at(),
			cooldown_ms: i64::try_from(state.cooldown.whole_milliseconds()).unwrap_or(i64::MAX),
		}
	}
}

impl FallbackSearchService {
	/// Reads the persisted breaker snapshot, which the worker keeps current.
	pub async fn status(&self) -> Result<StatusResponse> {
		let queue = self.store.counts().await?;
		let window = self.quota.snapshot().await?;
		let daily_limit = self.quota.daily_limit();
		let breaker = match self.store.load_breaker(BREAKER_ID).await? {
			Some(state) => state,
			None => CircuitBreakerState::new(&CircuitPolicy::from_config(&self.cfg.circuit)),
		};

		Ok(StatusResponse {
			queue,
			quota: QuotaView {
				daily_limit,
				consumed: window.consumed,
				usage_fraction: window.usage_fraction(daily_limit),
				window_start: window.window_start,
				window_end: window.window_end(),
			},
			circuit: CircuitView::from(&breaker),
		})
	}
}
