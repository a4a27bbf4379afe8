#![allow(dead_code)]

use std::{
	collections::VecDeque,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};

use serde_json::{Map, Value};
use time::{OffsetDateTime, macros::datetime};

use fsq_config::{
	Circuit, Config, Postgres, ProviderConfig, Queue, Quota, Retry, Scheduler as SchedulerConfig,
	Security, Service, Storage,
};
use fsq_domain::{ErrorKind, ManualClock, SearchRequest};
use fsq_service::{
	BoxFuture, FallbackSearchService, IngestOutcome, IngestionPipeline, ProviderError, Providers,
	Scheduler, SearchProvider, SearchResults,
};
use fsq_storage::MemoryStore;

pub const START: OffsetDateTime = datetime!(2026-05-01 09:00 UTC);

type SearchOutcome = Result<SearchResults, ProviderError>;

/// Replays scripted outcomes in order, then answers with one result item.
#[derive(Default)]
pub struct ScriptedSearch {
	script: Mutex<VecDeque<SearchOutcome>>,
	fallback: Mutex<Option<ProviderError>>,
	queries: Mutex<Vec<String>>,
}
impl ScriptedSearch {
	pub fn push(&self, outcome: SearchOutcome) {
		self.script.lock().expect("script lock").push_back(outcome);
	}

	pub fn push_error(&self, kind: ErrorKind, times: usize) {
		for _ in 0..times {
			self.push(Err(ProviderError::new(kind, format!("scripted {kind} failure"))));
		}
	}

	/// Fail every unscripted call with `error`.
	pub fn always_fail(&self, error: ProviderError) {
		*self.fallback.lock().expect("fallback lock") = Some(error);
	}

	pub fn calls(&self) -> usize {
		self.queries.lock().expect("queries lock").len()
	}

	pub fn queries(&self) -> Vec<String> {
		self.queries.lock().expect("queries lock").clone()
	}
}
impl SearchProvider for ScriptedSearch {
	fn search<'a>(
		&'a self,
		query: &'a fsq_domain::SearchQuery,
		_timeout: StdDuration,
	) -> BoxFuture<'a, SearchOutcome> {
		self.queries.lock().expect("queries lock").push(query.text.clone());

		let scripted = self.script.lock().expect("script lock").pop_front();
		let outcome = scripted.unwrap_or_else(|| {
			match self.fallback.lock().expect("fallback lock").clone() {
				Some(error) => Err(error),
				None => Ok(SearchResults {
					items: vec![serde_json::json!({ "url": format!("https://results.example/{}", query.text) })],
				}),
			}
		});

		Box::pin(async move { outcome })
	}
}

/// Never answers. Only useful with paused time.
pub struct HangingSearch;
impl SearchProvider for HangingSearch {
	fn search<'a>(
		&'a self,
		_query: &'a fsq_domain::SearchQuery,
		_timeout: StdDuration,
	) -> BoxFuture<'a, SearchOutcome> {
		Box::pin(async move {
			tokio::time::sleep(StdDuration::from_secs(3_600)).await;

			Ok(SearchResults { items: Vec::new() })
		})
	}
}

pub struct SpyIngestion {
	calls: AtomicUsize,
	outcome: Mutex<IngestOutcome>,
}
impl SpyIngestion {
	pub fn accepting() -> Self {
		Self { calls: AtomicUsize::new(0), outcome: Mutex::new(IngestOutcome::Ack) }
	}

	pub fn set_outcome(&self, outcome: IngestOutcome) {
		*self.outcome.lock().expect("outcome lock") = outcome;
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl IngestionPipeline for SpyIngestion {
	fn accept<'a>(
		&'a self,
		_items: &'a [Value],
		_request: &'a SearchRequest,
	) -> BoxFuture<'a, color_eyre::Result<IngestOutcome>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let outcome = self.outcome.lock().expect("outcome lock").clone();

		Box::pin(async move { Ok(outcome) })
	}
}

/// Never acknowledges. Only useful with paused time.
pub struct HangingIngestion;
impl IngestionPipeline for HangingIngestion {
	fn accept<'a>(
		&'a self,
		_items: &'a [Value],
		_request: &'a SearchRequest,
	) -> BoxFuture<'a, color_eyre::Result<IngestOutcome>> {
		Box::pin(async move {
			tokio::time::sleep(StdDuration::from_secs(3_600)).await;

			Ok(IngestOutcome::Ack)
		})
	}
}

pub fn provider(name: &str, timeout_ms: u64) -> ProviderConfig {
	ProviderConfig {
		api_base: "http://127.0.0.1:9".to_string(),
		api_key: "test-key".to_string(),
		path: format!("/v1/{name}"),
		timeout_ms,
		default_headers: Map::new(),
	}
}

pub fn test_config() -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: Storage {
			postgres: Postgres { dsn: "postgres://unused".to_string(), pool_max_conns: 1 },
		},
		provider: provider("search", 30_000),
		ingestion: provider("ingestion", 10_000),
		quota: Quota::default(),
		scheduler: SchedulerConfig::default(),
		circuit: Circuit::default(),
		retry: Retry::default(),
		queue: Queue::default(),
		security: Security::default(),
	}
}

pub struct Harness {
	pub service: FallbackSearchService,
	pub scheduler: Scheduler,
	pub store: Arc<MemoryStore>,
	pub clock: Arc<ManualClock>,
	pub search: Arc<ScriptedSearch>,
	pub ingestion: Arc<SpyIngestion>,
}
impl Harness {
	pub async fn new(cfg: Config) -> Self {
		Self::with_store(cfg, Arc::new(MemoryStore::new())).await
	}

	/// A second process over the same durable state.
	pub async fn with_store(cfg: Config, store: Arc<MemoryStore>) -> Self {
		let clock = Arc::new(ManualClock::new(START));
		let search = Arc::new(ScriptedSearch::default());
		let ingestion = Arc::new(SpyIngestion::accepting());
		let service = FallbackSearchService::new(cfg, store.clone(), clock.clone());
		let scheduler = service
			.scheduler(Providers::new(search.clone(), ingestion.clone()))
			.await
			.expect("Failed to build scheduler.");

		Self { service, scheduler, store, clock, search, ingestion }
	}

	pub async fn submit(&self, query: &str, priority: fsq_domain::Priority) -> uuid::Uuid {
		self.service
			.submit(fsq_service::SubmitRequest {
				query: query.to_string(),
				context: None,
				priority: Some(priority),
			})
			.await
			.expect("Failed to submit.")
			.item_id
	}
}
