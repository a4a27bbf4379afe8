//! Storage seams used by the service. `Db` backs them with Postgres and [`crate::MemoryStore`]
//! keeps everything in process.

use std::{future::Future, pin::Pin};

use time::OffsetDateTime;
use uuid::Uuid;

use fsq_domain::{
	CircuitBreakerState, EnqueueOutcome, EscalationRecord, FailureOutcome, ItemError,
	QueueCounts, QueueItem, QuotaWindow, RetryPolicy, SearchRequest,
};

use crate::{Result, breaker, db::Db, escalation, queue, quota};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait QueueStore
where
	Self: Send + Sync,
{
	fn enqueue<'a>(
		&'a self,
		request: &'a SearchRequest,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<EnqueueOutcome>>;

	/// Claims the most urgent eligible item, marking it in flight.
	fn claim_next<'a>(&'a self, now: OffsetDateTime) -> BoxFuture<'a, Result<Option<QueueItem>>>;

	fn record_success<'a>(&'a self, item_id: Uuid, now: OffsetDateTime)
	-> BoxFuture<'a, Result<()>>;

	fn record_failure<'a>(
		&'a self,
		item_id: Uuid,
		error: ItemError,
		policy: &'a RetryPolicy,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<FailureOutcome>>;

	fn release<'a>(&'a self, item_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>>;

	fn defer<'a>(
		&'a self,
		item_id: Uuid,
		until: OffsetDateTime,
		error: ItemError,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;

	fn recover_stale<'a>(
		&'a self,
		claimed_before: OffsetDateTime,
		policy: &'a RetryPolicy,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Vec<FailureOutcome>>>;

	fn counts<'a>(&'a self) -> BoxFuture<'a, Result<QueueCounts>>;

	fn find<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<QueueItem>>>;

	fn purge_completed<'a>(&'a self, before: OffsetDateTime) -> BoxFuture<'a, Result<u64>>;
}

pub trait EscalationStore
where
	Self: Send + Sync,
{
	fn list_escalations<'a>(&'a self, limit: u32) -> BoxFuture<'a, Result<Vec<EscalationRecord>>>;

	fn get_escalation<'a>(
		&'a self,
		fingerprint: &'a str,
	) -> BoxFuture<'a, Result<Option<EscalationRecord>>>;

	fn resolve_escalation<'a>(&'a self, fingerprint: &'a str)
	-> BoxFuture<'a, Result<Option<Uuid>>>;

	fn requeue_escalation<'a>(
		&'a self,
		fingerprint: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Option<Uuid>>>;
}

pub trait CircuitStore
where
	Self: Send + Sync,
{
	fn load_breaker<'a>(
		&'a self,
		breaker_id: &'a str,
	) -> BoxFuture<'a, Result<Option<CircuitBreakerState>>>;

	fn save_breaker<'a>(
		&'a self,
		breaker_id: &'a str,
		state: &'a CircuitBreakerState,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;
}

pub trait QuotaStore
where
	Self: Send + Sync,
{
	fn try_consume_quota<'a>(
		&'a self,
		daily_limit: u32,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>>;

	fn quota_snapshot<'a>(&'a self, now: OffsetDateTime) -> BoxFuture<'a, Result<QuotaWindow>>;
}

/// Everything the service needs from one backend.
pub trait Store: QueueStore + EscalationStore + CircuitStore + QuotaStore {}
impl<T> Store for T where T: QueueStore + EscalationStore + CircuitStore + QuotaStore {}

impl QueueStore for Db {
	fn enqueue<'a>(
		&'a self,
		request: &'a SearchRequest,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<EnqueueOutcome>> {
		Box::pin(queue::enqueue(self, request, now))
	}

	fn claim_next<'a>(&'a self, now: OffsetDateTime) -> BoxFuture<'a, Result<Option<QueueItem>>> {
		Box::pin(queue::claim_next(self, now))
	}

	fn record_success<'a>(
		&'a self,
		item_id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(queue::record_success(self, item_id, now))
	}

	fn record_failure<'a>(
		&'a self,
		item_id: Uuid,
		error: ItemError,
		policy: &'a RetryPolicy,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<FailureOutcome>> {
		Box::pin(queue::record_failure(self, item_id, error, policy, now))
	}

	fn release<'a>(&'a self, item_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>> {
		Box::pin(queue::release(self, item_id, now))
	}

	fn defer<'a>(
		&'a self,
		item_id: Uuid,
		until: OffsetDateTime,
		error: ItemError,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(queue::defer(self, item_id, until, error, now))
	}

	fn recover_stale<'a>(
		&'a self,
		claimed_before: OffsetDateTime,
		policy: &'a RetryPolicy,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Vec<FailureOutcome>>> {
		Box::pin(queue::recover_stale(self, claimed_before, policy, now))
	}

	fn counts<'a>(&'a self) -> BoxFuture<'a, Result<QueueCounts>> {
		Box::pin(queue::counts(self))
	}

	fn find<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<QueueItem>>> {
		Box::pin(queue::find(self, fingerprint))
	}

	fn purge_completed<'a>(&'a self, before: OffsetDateTime) -> BoxFuture<'a, Result<u64>> {
		Box::pin(queue::purge_completed(self, before))
	}
}

impl EscalationStore for Db {
	fn list_escalations<'a>(&'a self, limit: u32) -> BoxFuture<'a, Result<Vec<EscalationRecord>>> {
		Box::pin(escalation::list(self, limit))
	}

	fn get_escalation<'a>(
		&'a self,
		fingerprint: &'a str,
	) -> BoxFuture<'a, Result<Option<EscalationRecord>>> {
		Box::pin(escalation::get(self, fingerprint))
	}

	fn resolve_escalation<'a>(
		&'a self,
		fingerprint: &'a str,
	) -> BoxFuture<'a, Result<Option<Uuid>>> {
		Box::pin(escalation::resolve(self, fingerprint))
	}

	fn requeue_escalation<'a>(
		&'a self,
		fingerprint: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Option<Uuid>>> {
		Box::pin(escalation::requeue(self, fingerprint, now))
	}
}

impl CircuitStore for Db {
	fn load_breaker<'a>(
		&'a self,
		breaker_id: &'a str,
	) -> BoxFuture<'a, Result<Option<CircuitBreakerState>>> {
		Box::pin(breaker::load(self, breaker_id))
	}

	fn save_breaker<'a>(
		&'a self,
		breaker_id: &'a str,
		state: &'a CircuitBreakerState,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(breaker::save(self, breaker_id, state, now))
	}
}

impl QuotaStore for Db {
	fn try_consume_quota<'a>(
		&'a self,
		daily_limit: u32,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(quota::try_consume(self, daily_limit, now))
	}

	fn quota_snapshot<'a>(&'a self, now: OffsetDateTime) -> BoxFuture<'a, Result<QuotaWindow>> {
		Box::pin(quota::snapshot(self, now))
	}
}
