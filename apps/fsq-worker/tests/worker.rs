use std::{sync::Arc, time::Duration as StdDuration};

use serde_json::{Map, Value};
use time::{Duration, macros::datetime};

use fsq_config::{
	Circuit, Config, Postgres, ProviderConfig, Queue, Quota, Retry, Scheduler, Security, Service,
	Storage,
};
use fsq_domain::{Clock, ItemState, ManualClock, Priority, SearchQuery, SearchRequest};
use fsq_service::{
	BoxFuture, FallbackSearchService, IngestOutcome, IngestionPipeline, ProviderError, Providers,
	SearchProvider, SearchResults, SubmitRequest,
};
use fsq_storage::{MemoryStore, QueueStore};
use fsq_worker::worker::{self, WorkerState};

struct EchoSearch;
impl SearchProvider for EchoSearch {
	fn search<'a>(
		&'a self,
		query: &'a SearchQuery,
		_timeout: StdDuration,
	) -> BoxFuture<'a, Result<SearchResults, ProviderError>> {
		let items = vec![serde_json::json!({ "title": query.text })];

		Box::pin(async move { Ok(SearchResults { items }) })
	}
}

struct AckIngestion;
impl IngestionPipeline for AckIngestion {
	fn accept<'a>(
		&'a self,
		_items: &'a [Value],
		_request: &'a SearchRequest,
	) -> BoxFuture<'a, color_eyre::Result<IngestOutcome>> {
		Box::pin(async move { Ok(IngestOutcome::Ack) })
	}
}

fn provider(name: &str) -> ProviderConfig {
	ProviderConfig {
		api_base: "http://127.0.0.1:9".to_string(),
		api_key: "test-key".to_string(),
		path: format!("/v1/{name}"),
		timeout_ms: 5_000,
		default_headers: Map::new(),
	}
}

fn test_config() -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: Storage {
			postgres: Postgres { dsn: "postgres://unused".to_string(), pool_max_conns: 1 },
		},
		provider: provider("search"),
		ingestion: provider("ingestion"),
		quota: Quota::default(),
		scheduler: Scheduler { min_call_interval_ms: Some(1_000), ..Scheduler::default() },
		circuit: Circuit::default(),
		retry: Retry::default(),
		queue: Queue::default(),
		security: Security::default(),
	}
}

async fn worker_state(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> WorkerState {
	let service = Arc::new(FallbackSearchService::new(test_config(), store, clock));
	let scheduler = service
		.scheduler(Providers::new(Arc::new(EchoSearch), Arc::new(AckIngestion)))
		.await
		.expect("Failed to build scheduler.");

	WorkerState { service, scheduler }
}

#[tokio::test(start_paused = true)]
async fn worker_drains_queue_and_stops_on_shutdown() {
	let store = Arc::new(MemoryStore::new());
	let clock = Arc::new(ManualClock::new(datetime!(2026-05-01 09:00 UTC)));
	let state = worker_state(store.clone(), clock).await;

	for query in ["first", "second"] {
		state
			.service
			.submit(SubmitRequest {
				query: query.to_string(),
				context: None,
				priority: Some(Priority::Normal),
			})
			.await
			.expect("Failed to submit.");
	}

	worker::run_worker(&state, tokio::time::sleep(StdDuration::from_millis(1_500))).await;

	let items = store.items();

	assert_eq!(items.len(), 2);
	assert!(items.iter().all(|item| item.state == ItemState::Completed));
}

#[tokio::test(start_paused = true)]
async fn worker_purges_expired_completed_items_on_start() {
	let store = Arc::new(MemoryStore::new());
	let clock = Arc::new(ManualClock::new(datetime!(2026-05-01 09:00 UTC)));
	let request = SearchRequest::new(
		SearchQuery::new("old result", None),
		Priority::Normal,
		clock.now(),
	);
	let item_id = store.enqueue(&request, clock.now()).await.expect("enqueue").item_id();

	store.claim_next(clock.now()).await.expect("claim").expect("claimed item");
	store.record_success(item_id, clock.now()).await.expect("complete");
	clock.advance(Duration::days(31));

	let state = worker_state(store.clone(), clock).await;

	worker::run_worker(&state, tokio::time::sleep(StdDuration::from_millis(10))).await;

	assert!(store.items().is_empty());
}
