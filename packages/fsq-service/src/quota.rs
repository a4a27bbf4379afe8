use std::sync::Arc;

use fsq_domain::{Clock, QuotaWindow};
use fsq_storage::Store;

use crate::Result;

/// Daily call budget backed by the store, so restarts never hand out spent quota.
#[derive(Clone)]
pub struct QuotaTracker {
	store: Arc<dyn Store>,
	clock: Arc<dyn Clock>,
	daily_limit: u32,
}
impl QuotaTracker {
	pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, daily_limit: u32) -> Self {
		Self { store, clock, daily_limit }
	}

	pub fn daily_limit(&self) -> u32 {
		self.daily_limit
	}

	/// Spends one call if the current window has budget left. `false` has no side effects.
	pub async fn try_consume(&self) -> Result<bool> {
		Ok(self.store.try_consume_quota(self.daily_limit, self.clock.now()).await?)
	}

	pub async fn snapshot(&self) -> Result<QuotaWindow> {
		Ok(self.store.quota_snapshot(self.clock.now()).await?)
	}

	pub async fn current_usage_fraction(&self) -> Result<f64> {
		Ok(self.snapshot().await?.usage_fraction(self.daily_limit))
	}
}
