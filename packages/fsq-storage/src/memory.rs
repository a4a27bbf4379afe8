//! In-process store with the same transition rules as Postgres. Used by tests and dry runs.

use std::{
	collections::{BTreeMap, HashMap},
	future,
	sync::{Mutex, MutexGuard},
};

use time::OffsetDateTime;
use uuid::Uuid;

use fsq_domain::{
	CircuitBreakerState, EnqueueOutcome, ErrorKind, EscalationRecord, FailureOutcome, ItemError,
	ItemState, QueueCounts, QueueItem, QuotaWindow, RetryPolicy, SearchRequest,
};

use crate::{
	BoxFuture, Error, Result,
	store::{CircuitStore, EscalationStore, QueueStore, QuotaStore},
};

const STALE_CLAIM_MESSAGE: &str = "claim expired before a verdict was recorded";

#[derive(Debug, Default)]
pub struct MemoryStore {
	state: Mutex<MemoryState>,
}
impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every stored item that has not been purged, in no particular order.
	pub fn items(&self) -> Vec<QueueItem> {
		self.lock().items.values().cloned().collect()
	}

	fn lock(&self) -> MutexGuard<'_, MemoryState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn with_state<T>(
		&self,
		f: impl FnOnce(&mut MemoryState) -> Result<T>,
	) -> BoxFuture<'_, Result<T>>
	where
		T: Send + 'static,
	{
		let result = f(&mut self.lock());

		Box::pin(future::ready(result))
	}
}

#[derive(Debug, Default)]
struct MemoryState {
	items: HashMap<Uuid, QueueItem>,
	completed_at: HashMap<Uuid, OffsetDateTime>,
	escalations: BTreeMap<String, EscalationRecord>,
	breakers: HashMap<String, CircuitBreakerState>,
	quota: Option<QuotaWindow>,
}
impl MemoryState {
	fn live_item_id(&self, fingerprint: &str) -> Option<Uuid> {
		self.items
			.values()
			.find(|item| item.state.is_live() && item.request.fingerprint() == fingerprint)
			.map(|item| item.item_id)
	}

	fn in_flight(&mut self, item_id: Uuid) -> Result<&mut QueueItem> {
		let item = self
			.items
			.get_mut(&item_id)
			.ok_or_else(|| Error::NotFound(format!("Queue item {item_id}.")))?;

		if item.state != ItemState::InFlight {
			return Err(Error::Conflict(format!(
				"Queue item {item_id} is {} rather than IN_FLIGHT.",
				item.state
			)));
		}

		Ok(item)
	}

	fn fail(
		&mut self,
		item_id: Uuid,
		error: ItemError,
		policy: &RetryPolicy,
		now: OffsetDateTime,
	) -> Result<FailureOutcome> {
		let outcome = self.in_flight(item_id)?.apply_failure(error, policy, now);

		if let FailureOutcome::Escalated(record) = &outcome {
			self.escalations.entry(record.fingerprint().to_string()).or_insert_with(|| record.clone());
		}

		Ok(outcome)
	}
}

impl QueueStore for MemoryStore {
	fn enqueue<'a>(
		&'a self,
		request: &'a SearchRequest,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<EnqueueOutcome>> {
		self.with_state(|state| {
			if let Some(item_id) = state.live_item_id(request.fingerprint()) {
				return Ok(EnqueueOutcome::Duplicate { item_id });
			}

			let item = QueueItem::new(request.clone(), now);
			let item_id = item.item_id;

			state.items.insert(item_id, item);

			Ok(EnqueueOutcome::Inserted { item_id })
		})
	}

	fn claim_next<'a>(&'a self, now: OffsetDateTime) -> BoxFuture<'a, Result<Option<QueueItem>>> {
		self.with_state(|state| {
			let next = state
				.items
				.values_mut()
				.filter(|item| item.state == ItemState::Pending && item.next_eligible_at <= now)
				.min_by_key(|item| {
					(
						item.request.priority().rank(),
						item.next_eligible_at,
						item.request.created_at(),
						item.item_id,
					)
				});

			Ok(next.map(|item| {
				item.claim(now);

				item.clone()
			}))
		})
	}

	fn record_success<'a>(
		&'a self,
		item_id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		self.with_state(|state| {
			state.in_flight(item_id)?.complete(now);
			state.completed_at.insert(item_id, now);

			Ok(())
		})
	}

	fn record_failure<'a>(
		&'a self,
		item_id: Uuid,
		error: ItemError,
		policy: &'a RetryPolicy,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<FailureOutcome>> {
		self.with_state(|state| state.fail(item_id, error, policy, now))
	}

	fn release<'a>(&'a self, item_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>> {
		self.with_state(|state| {
			state.in_flight(item_id)?.release(now);

			Ok(())
		})
	}

	fn defer<'a>(
		&'a self,
		item_id: Uuid,
		until: OffsetDateTime,
		error: ItemError,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		self.with_state(|state| {
			state.in_flight(item_id)?.defer(until, error, now);

			Ok(())
		})
	}

	fn recover_stale<'a>(
		&'a self,
		claimed_before: OffsetDateTime,
		policy: &'a RetryPolicy,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Vec<FailureOutcome>>> {
		self.with_state(|state| {
			let mut stale = state
				.items
				.values()
				.filter(|item| {
					item.state == ItemState::InFlight
						&& item.claimed_at.is_some_and(|claimed_at| claimed_at < claimed_before)
				})
				.map(|item| (item.claimed_at, item.item_id))
				.collect::<Vec<_>>();

			stale.sort();

			stale
				.into_iter()
				.map(|(_, item_id)| {
					let error = ItemError::new(ErrorKind::Transient, STALE_CLAIM_MESSAGE);

					state.fail(item_id, error, policy, now)
				})
				.collect()
		})
	}

	fn counts<'a>(&'a self) -> BoxFuture<'a, Result<QueueCounts>> {
		self.with_state(|state| {
			let mut counts = QueueCounts::default();

			for item in state.items.values() {
				match item.state {
					ItemState::Pending => counts.pending += 1,
					ItemState::InFlight => counts.in_flight += 1,
					ItemState::Escalated => counts.escalated += 1,
					ItemState::Completed => counts.completed += 1,
				}
			}

			Ok(counts)
		})
	}

	fn find<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<QueueItem>>> {
		self.with_state(|state| {
			Ok(state.live_item_id(fingerprint).and_then(|item_id| state.items.get(&item_id).cloned()))
		})
	}

	fn purge_completed<'a>(&'a self, before: OffsetDateTime) -> BoxFuture<'a, Result<u64>> {
		self.with_state(|state| {
			let expired = state
				.completed_at
				.iter()
				.filter(|(_, completed_at)| **completed_at < before)
				.map(|(item_id, _)| *item_id)
				.collect::<Vec<_>>();

			for item_id in &expired {
				state.completed_at.remove(item_id);
				state.items.remove(item_id);
			}

			Ok(expired.len() as u64)
		})
	}
}

impl EscalationStore for MemoryStore {
	fn list_escalations<'a>(&'a self, limit: u32) -> BoxFuture<'a, Result<Vec<EscalationRecord>>> {
		self.with_state(|state| {
			let mut records = state.escalations.values().cloned().collect::<Vec<_>>();

			records.sort_by(|a, b| {
				a.escalated_at.cmp(&b.escalated_at).then_with(|| a.fingerprint().cmp(b.fingerprint()))
			});
			records.truncate(limit as usize);

			Ok(records)
		})
	}

	fn get_escalation<'a>(
		&'a self,
		fingerprint: &'a str,
	) -> BoxFuture<'a, Result<Option<EscalationRecord>>> {
		self.with_state(|state| Ok(state.escalations.get(fingerprint).cloned()))
	}

	fn resolve_escalation<'a>(
		&'a self,
		fingerprint: &'a str,
	) -> BoxFuture<'a, Result<Option<Uuid>>> {
		self.with_state(|state| {
			let Some(record) = state.escalations.remove(fingerprint) else {
				return Ok(None);
			};

			if state.items.get(&record.item_id).is_some_and(|item| item.state == ItemState::Escalated)
			{
				state.items.remove(&record.item_id);
			}

			Ok(Some(record.item_id))
		})
	}

	fn requeue_escalation<'a>(
		&'a self,
		fingerprint: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Option<Uuid>>> {
		self.with_state(|state| {
			let Some(record) = state.escalations.get(fingerprint) else {
				return Ok(None);
			};
			let item_id = record.item_id;
			let item = state
				.items
				.get_mut(&item_id)
				.ok_or_else(|| Error::NotFound(format!("Queue item {item_id}.")))?;

			if item.state != ItemState::Escalated {
				return Err(Error::Conflict(format!(
					"Queue item {item_id} is {} rather than ESCALATED.",
					item.state
				)));
			}

			item.reset_for_requeue(now);
			state.escalations.remove(fingerprint);

			Ok(Some(item_id))
		})
	}
}

impl CircuitStore for MemoryStore {
	fn load_breaker<'a>(
		&'a self,
		breaker_id: &'a str,
	) -> BoxFuture<'a, Result<Option<CircuitBreakerState>>> {
		self.with_state(|state| {
			Ok(state.breakers.get(breaker_id).cloned().map(|mut breaker| {
				breaker.trial_in_flight = false;

				breaker
			}))
		})
	}

	fn save_breaker<'a>(
		&'a self,
		breaker_id: &'a str,
		breaker: &'a CircuitBreakerState,
		_now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		self.with_state(|state| {
			state.breakers.insert(breaker_id.to_string(), breaker.clone());

			Ok(())
		})
	}
}

impl QuotaStore for MemoryStore {
	fn try_consume_quota<'a>(
		&'a self,
		daily_limit: u32,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		self.with_state(|state| {
			let window = state.quota.get_or_insert_with(|| QuotaWindow::starting_at(now));

			Ok(window.try_consume(daily_limit, now))
		})
	}

	fn quota_snapshot<'a>(&'a self, now: OffsetDateTime) -> BoxFuture<'a, Result<QuotaWindow>> {
		self.with_state(|state| {
			let mut window = state.quota.unwrap_or_else(|| QuotaWindow::starting_at(now));

			window.roll(now);

			Ok(window)
		})
	}
}

#[cfg(test)]
mod tests {
	use time::{Duration, macros::datetime};

	use fsq_domain::{Priority, SearchQuery};

	use super::*;

	fn request(text: &str, priority: Priority) -> SearchRequest {
		SearchRequest::new(SearchQuery::new(text, None), priority, datetime!(2026-05-01 08:00 UTC))
	}

	#[tokio::test]
	async fn urgent_items_are_claimed_first() {
		let store = MemoryStore::new();
		let now = datetime!(2026-05-01 09:00 UTC);

		store.enqueue(&request("background", Priority::Background), now).await.expect("enqueue");
		store.enqueue(&request("normal", Priority::Normal), now).await.expect("enqueue");
		store.enqueue(&request("urgent", Priority::Urgent), now).await.expect("enqueue");

		let claimed = store.claim_next(now).await.expect("claim").expect("An item is eligible.");

		assert_eq!(claimed.request.query().text, "urgent");
		assert_eq!(claimed.state, ItemState::InFlight);
	}

	#[tokio::test]
	async fn duplicate_fingerprint_returns_existing_item() {
		let store = MemoryStore::new();
		let now = datetime!(2026-05-01 09:00 UTC);
		let first =
			store.enqueue(&request("Rust  Async", Priority::Normal), now).await.expect("enqueue");
		let second =
			store.enqueue(&request("rust async", Priority::Urgent), now).await.expect("enqueue");

		assert!(matches!(first, EnqueueOutcome::Inserted { .. }));
		assert_eq!(second, EnqueueOutcome::Duplicate { item_id: first.item_id() });
		assert_eq!(store.counts().await.expect("counts").total(), 1);
	}

	#[tokio::test]
	async fn completed_fingerprint_can_be_enqueued_again() {
		let store = MemoryStore::new();
		let now = datetime!(2026-05-01 09:00 UTC);
		let first = store.enqueue(&request("again", Priority::Normal), now).await.expect("enqueue");

		store.claim_next(now).await.expect("claim");
		store.record_success(first.item_id(), now).await.expect("success");

		let second = store.enqueue(&request("again", Priority::Normal), now).await.expect("enqueue");

		assert!(matches!(second, EnqueueOutcome::Inserted { .. }));
		assert_ne!(second.item_id(), first.item_id());
	}

	#[tokio::test]
	async fn transitions_require_an_in_flight_item() {
		let store = MemoryStore::new();
		let now = datetime!(2026-05-01 09:00 UTC);
		let outcome = store.enqueue(&request("idle", Priority::Normal), now).await.expect("enqueue");

		assert!(matches!(
			store.record_success(outcome.item_id(), now).await,
			Err(Error::Conflict(_))
		));
		assert!(matches!(store.release(Uuid::new_v4(), now).await, Err(Error::NotFound(_))));
	}

	#[tokio::test]
	async fn stale_claims_fail_once_and_become_pending() {
		let store = MemoryStore::new();
		let policy = RetryPolicy::default();
		let now = datetime!(2026-05-01 09:00 UTC);

		store.enqueue(&request("stale", Priority::Normal), now).await.expect("enqueue");

		let claimed = store.claim_next(now).await.expect("claim").expect("eligible");
		let later = now + Duration::minutes(5);
		let recovered = store
			.recover_stale(later - Duration::minutes(2), &policy, later)
			.await
			.expect("recover");

		assert_eq!(recovered.len(), 1);
		assert!(matches!(recovered[0], FailureOutcome::Retried { attempt: 1, .. }));

		let item = store.find(claimed.request.fingerprint()).await.expect("find").expect("live");

		assert_eq!(item.state, ItemState::Pending);
		assert_eq!(item.error_history, vec![ErrorKind::Transient]);
	}

	#[tokio::test]
	async fn purge_only_drops_old_completed_items() {
		let store = MemoryStore::new();
		let now = datetime!(2026-05-01 09:00 UTC);

		for text in ["old", "kept"] {
			let outcome = store.enqueue(&request(text, Priority::Normal), now).await.expect("enqueue");

			store.claim_next(now).await.expect("claim");

			if text == "old" {
				store.record_success(outcome.item_id(), now).await.expect("success");
			}
		}

		let purged = store.purge_completed(now + Duration::days(31)).await.expect("purge");
		let counts = store.counts().await.expect("counts");

		assert_eq!(purged, 1);
		assert_eq!(counts, QueueCounts { pending: 0, in_flight: 1, escalated: 0, completed: 0 });
	}
}
