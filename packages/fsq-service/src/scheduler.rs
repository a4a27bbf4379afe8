//! The single consumer of the queue. One tick makes at most one provider call.

use std::{future::Future, sync::Arc, time::Duration as StdDuration};

use time::{Duration, OffsetDateTime};
use tokio::time::{self as tokio_time, MissedTickBehavior};
use uuid::Uuid;

use fsq_config::Config;
use fsq_domain::{
	CircuitPolicy, Clock, ErrorKind, FailureOutcome, ItemError, Permit, QueueItem, RetryPolicy,
};
use fsq_storage::Store;

use crate::{
	CircuitBreaker, IngestOutcome, ProviderError, Providers, QuotaTracker, Result, SearchResults,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
	/// The breaker is open; the queue was not touched.
	CircuitOpen { until: Option<OffsetDateTime> },
	/// No item is eligible yet.
	Idle,
	/// Local quota is spent. The item went back unchanged.
	QuotaExhausted { item_id: Uuid },
	Completed { item_id: Uuid },
	Retried { item_id: Uuid, attempt: u32, next_eligible_at: OffsetDateTime },
	/// The provider reported its own limit. No attempt was counted.
	Deferred { item_id: Uuid, until: OffsetDateTime },
	Escalated { item_id: Uuid },
	/// A store call failed. Any claimed item is left to stale-claim recovery.
	StoreFailed,
}

pub struct Scheduler {
	store: Arc<dyn Store>,
	clock: Arc<dyn Clock>,
	providers: Providers,
	quota: QuotaTracker,
	breaker: CircuitBreaker,
	retry: RetryPolicy,
	tick_interval: StdDuration,
	provider_timeout: StdDuration,
	ingestion_timeout: StdDuration,
	stale_claim_timeout: Duration,
	provider_quota_defer: Duration,
}
impl Scheduler {
	pub async fn new(
		cfg: &Config,
		store: Arc<dyn Store>,
		clock: Arc<dyn Clock>,
		providers: Providers,
	) -> Result<Self> {
		let breaker = CircuitBreaker::load(
			store.clone(),
			clock.clone(),
			CircuitPolicy::from_config(&cfg.circuit),
		)
		.await?;
		let quota = QuotaTracker::new(store.clone(), clock.clone(), cfg.quota.daily_limit);
		let interval_ms = cfg.scheduler.effective_call_interval_ms(cfg.quota.daily_limit);

		Ok(Self {
			store,
			clock,
			providers,
			quota,
			breaker,
			retry: RetryPolicy::from_config(&cfg.retry),
			tick_interval: StdDuration::from_millis(interval_ms),
			provider_timeout: StdDuration::from_millis(cfg.provider.timeout_ms),
			ingestion_timeout: StdDuration::from_millis(cfg.ingestion.timeout_ms),
			stale_claim_timeout: millis(cfg.scheduler.stale_claim_timeout_ms),
			provider_quota_defer: millis(cfg.scheduler.provider_quota_defer_ms),
		})
	}

	pub fn breaker(&self) -> &CircuitBreaker {
		&self.breaker
	}

	pub fn tick_interval(&self) -> StdDuration {
		self.tick_interval
	}

	/// Ticks every `tick_interval` until `shutdown` resolves. A tick already running finishes
	/// first.
	pub async fn run<F>(&self, shutdown: F)
	where
		F: Future<Output = ()>,
	{
		let mut interval = tokio_time::interval(self.tick_interval);

		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
		tokio::pin!(shutdown);

		tracing::info!(
			interval_ms = self.tick_interval.as_millis() as u64,
			"Scheduler started."
		);

		loop {
			tokio::select! {
				_ = &mut shutdown => break,
				_ = interval.tick() => {
					let outcome = self.tick().await;

					tracing::debug!(?outcome, "Scheduler tick finished.");
				},
			}
		}

		tracing::info!("Scheduler stopped.");
	}

	/// Never fails. Store errors are logged and reported as [`TickOutcome::StoreFailed`].
	pub async fn tick(&self) -> TickOutcome {
		let permit = self.breaker.acquire().await;

		if let Permit::Rejected { until } = permit {
			return TickOutcome::CircuitOpen { until };
		}

		let outcome = self.tick_permitted().await;

		// No-op once the trial has produced a verdict.
		if permit == Permit::Trial {
			self.breaker.release_trial().await;
		}

		match outcome {
			Ok(outcome) => outcome,
			Err(err) => {
				tracing::error!(error = %err, "Scheduler tick failed.");

				TickOutcome::StoreFailed
			},
		}
	}

	async fn tick_permitted(&self) -> Result<TickOutcome> {
		let now = self.clock.now();

		self.recover_stale(now).await?;

		let Some(item) = self.store.claim_next(now).await? else {
			return Ok(TickOutcome::Idle);
		};

		if !self.quota.try_consume().await? {
			self.store.release(item.item_id, self.clock.now()).await?;

			tracing::info!(item_id = %item.item_id, "Daily quota exhausted. Item released.");

			return Ok(TickOutcome::QuotaExhausted { item_id: item.item_id });
		}

		match self.call_provider(&item).await {
			Ok(results) => self.ingest(&item, results).await,
			Err(err) if err.kind == ErrorKind::Quota => self.defer(&item, err).await,
			Err(err) => {
				self.breaker.record_failure().await;
				self.fail(&item, ItemError::new(err.kind, &err.message)).await
			},
		}
	}

	async fn recover_stale(&self, now: OffsetDateTime) -> Result<()> {
		let Some(claimed_before) = now.checked_sub(self.stale_claim_timeout) else {
			return Ok(());
		};
		let outcomes = self.store.recover_stale(claimed_before, &self.retry, now).await?;

		for outcome in outcomes {
			match outcome {
				FailureOutcome::Retried { attempt, next_eligible_at } => {
					tracing::warn!(
						attempt,
						next_eligible_at = %next_eligible_at,
						"Recovered a stale claim."
					);
				},
				FailureOutcome::Escalated(record) => {
					tracing::warn!(
						item_id = %record.item_id,
						fingerprint = record.fingerprint(),
						attempt = record.total_attempts,
						"Recovered a stale claim and escalated it."
					);
				},
			}
		}

		Ok(())
	}

	async fn call_provider(
		&self,
		item: &QueueItem,
	) -> std::result::Result<SearchResults, ProviderError> {
		let call = self.providers.search.search(item.request.query(), self.provider_timeout);

		match tokio_time::timeout(self.provider_timeout, call).await {
			Ok(result) => result,
			Err(_) => Err(ProviderError::new(
				ErrorKind::Transient,
				format!(
					"Search provider timed out after {} ms.",
					self.provider_timeout.as_millis()
				),
			)),
		}
	}

	async fn ingest(&self, item: &QueueItem, results: SearchResults) -> Result<TickOutcome> {
		let accept = self.providers.ingestion.accept(&results.items, &item.request);
		let accepted = match tokio_time::timeout(self.ingestion_timeout, accept).await {
			Ok(accepted) => accepted,
			Err(_) => Err(color_eyre::eyre::eyre!(
				"Ingestion timed out after {} ms.",
				self.ingestion_timeout.as_millis()
			)),
		};

		// The provider answered, so the breaker sees a success whatever the sink does.
		match accepted {
			Ok(IngestOutcome::Ack) => {
				self.store.record_success(item.item_id, self.clock.now()).await?;
				self.breaker.record_success().await;

				tracing::info!(
					item_id = %item.item_id,
					fingerprint = item.request.fingerprint(),
					results = results.items.len(),
					"Fallback search completed."
				);

				Ok(TickOutcome::Completed { item_id: item.item_id })
			},
			Ok(IngestOutcome::Reject { reason }) => {
				self.breaker.record_success().await;

				let error = ItemError::new(
					ErrorKind::Transient,
					format!("Ingestion rejected results: {reason}"),
				);

				self.fail(item, error).await
			},
			Err(err) => {
				self.breaker.record_success().await;

				let error =
					ItemError::new(ErrorKind::Transient, format!("Ingestion failed: {err}"));

				self.fail(item, error).await
			},
		}
	}

	async fn defer(&self, item: &QueueItem, err: ProviderError) -> Result<TickOutcome> {
		let now = self.clock.now();
		// Provider hints are capped at the longest retry backoff.
		let delay = err
			.retry_after
			.map(|retry_after| {
				Duration::try_from(retry_after).unwrap_or(Duration::MAX).min(self.retry.max)
			})
			.unwrap_or(self.provider_quota_defer);
		let until = now
			.checked_add(delay)
			.unwrap_or_else(|| now.saturating_add(self.provider_quota_defer));

		self.store
			.defer(item.item_id, until, ItemError::new(ErrorKind::Quota, &err.message), now)
			.await?;

		tracing::info!(
			item_id = %item.item_id,
			until = %until,
			"Search provider reported quota exhaustion. Item deferred."
		);

		Ok(TickOutcome::Deferred { item_id: item.item_id, until })
	}

	async fn fail(&self, item: &QueueItem, error: ItemError) -> Result<TickOutcome> {
		let kind = error.kind;
		let message = error.message.clone();
		let outcome =
			self.store.record_failure(item.item_id, error, &self.retry, self.clock.now()).await?;

		match outcome {
			FailureOutcome::Retried { attempt, next_eligible_at } => {
				tracing::info!(
					item_id = %item.item_id,
					attempt,
					kind = %kind,
					error = %message,
					next_eligible_at = %next_eligible_at,
					"Fallback search failed. Retry scheduled."
				);

				Ok(TickOutcome::Retried { item_id: item.item_id, attempt, next_eligible_at })
			},
			FailureOutcome::Escalated(record) => {
				tracing::warn!(
					item_id = %item.item_id,
					fingerprint = record.fingerprint(),
					attempt = record.total_attempts,
					kind = %kind,
					error = %message,
					"Fallback search exhausted its retries. Escalated for review."
				);

				Ok(TickOutcome::Escalated { item_id: item.item_id })
			},
		}
	}
}

fn millis(ms: u64) -> Duration {
	Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
