use std::sync::Arc;

use tokio::sync::Mutex;

use fsq_domain::{CircuitBreakerState, CircuitPolicy, CircuitStatus, Clock, Permit};
use fsq_storage::Store;

use crate::Result;

/// Storage key of the search provider's breaker snapshot.
pub const BREAKER_ID: &str = "search_provider";

/// Shared breaker for the search provider. Every mutation is written through to the store while
/// the lock is held, so snapshots land in transition order.
pub struct CircuitBreaker {
	state: Mutex<CircuitBreakerState>,
	policy: CircuitPolicy,
	store: Arc<dyn Store>,
	clock: Arc<dyn Clock>,
}
impl CircuitBreaker {
	/// Restores the last snapshot, or starts closed.
	pub async fn load(
		store: Arc<dyn Store>,
		clock: Arc<dyn Clock>,
		policy: CircuitPolicy,
	) -> Result<Self> {
		let state = match store.load_breaker(BREAKER_ID).await? {
			Some(state) => {
				tracing::info!(
					status = %state.status,
					consecutive_failures = state.consecutive_failures,
					"Restored circuit breaker state."
				);

				state
			},
			None => CircuitBreakerState::new(&policy),
		};

		Ok(Self { state: Mutex::new(state), policy, store, clock })
	}

	pub async fn acquire(&self) -> Permit {
		let mut state = self.state.lock().await;
		let before = state.status;
		let permit = state.acquire(self.clock.now());

		if state.status != before {
			self.persist(&state, before).await;
		}

		permit
	}

	/// Gives back a half-open trial that ended without a provider verdict.
	pub async fn release_trial(&self) {
		self.state.lock().await.release_trial();
	}

	pub async fn record_success(&self) {
		let mut state = self.state.lock().await;
		let before = state.status;
		let failures_before = state.consecutive_failures;

		state.record_success(&self.policy);

		if state.status != before || state.consecutive_failures != failures_before {
			self.persist(&state, before).await;
		}
	}

	pub async fn record_failure(&self) {
		let mut state = self.state.lock().await;
		let before = state.status;

		state.record_failure(&self.policy, self.clock.now());
		self.persist(&state, before).await;
	}

	pub async fn state(&self) -> CircuitBreakerState {
		self.state.lock().await.clone()
	}

	async fn persist(&self, state: &CircuitBreakerState, before: CircuitStatus) {
		if state.status != before {
			tracing::warn!(
				from = %before,
				to = %state.status,
				consecutive_failures = state.consecutive_failures,
				cooldown_ms = state.cooldown.whole_milliseconds() as u64,
				"Circuit breaker changed state."
			);
		}

		// The in-memory state stays authoritative for this process when the write fails.
		if let Err(err) = self.store.save_breaker(BREAKER_ID, state, self.clock.now()).await {
			tracing::error!(error = %err, "Failed to persist circuit breaker state.");
		}
	}
}
