pub mod circuit;
pub mod escalation;
pub mod quota;
pub mod scheduler;
pub mod status;
pub mod submit;
pub mod time_serde;

mod error;

pub use circuit::{BREAKER_ID, CircuitBreaker};
pub use error::{Error, Result};
pub use escalation::{
	EscalationAction, EscalationActionRequest, EscalationActionResponse, EscalationListRequest,
	EscalationListResponse, EscalationManager, EscalationView,
};
pub use fsq_storage::BoxFuture;
pub use quota::QuotaTracker;
pub use scheduler::{Scheduler, TickOutcome};
pub use status::{CircuitView, QuotaView, StatusResponse};
pub use submit::{SubmitRequest, SubmitResponse, SubmitStatus};

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use time::OffsetDateTime;

use fsq_config::Config;
use fsq_domain::{Clock, ErrorKind, SearchQuery, SearchRequest};
use fsq_providers::{
	ingestion::{Delivery, IngestPayload, IngestionClient},
	search::SearchClient,
};
use fsq_storage::Store;

pub trait SearchProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		query: &'a SearchQuery,
		timeout: Duration,
	) -> BoxFuture<'a, std::result::Result<SearchResults, ProviderError>>;
}

pub trait IngestionPipeline
where
	Self: Send + Sync,
{
	fn accept<'a>(
		&'a self,
		items: &'a [Value],
		request: &'a SearchRequest,
	) -> BoxFuture<'a, color_eyre::Result<IngestOutcome>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
	pub items: Vec<Value>,
}

/// A classified search failure. `retry_after` is only meaningful for [`ErrorKind::Quota`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
	pub kind: ErrorKind,
	pub message: String,
	pub retry_after: Option<Duration>,
}
impl ProviderError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self { kind, message: message.into(), retry_after: None }
	}

	pub fn quota(retry_after: Option<Duration>) -> Self {
		Self { kind: ErrorKind::Quota, message: "provider quota exhausted".to_string(), retry_after }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
	Ack,
	Reject { reason: String },
}

#[derive(Clone)]
pub struct Providers {
	pub search: Arc<dyn SearchProvider>,
	pub ingestion: Arc<dyn IngestionPipeline>,
}
impl Providers {
	pub fn new(search: Arc<dyn SearchProvider>, ingestion: Arc<dyn IngestionPipeline>) -> Self {
		Self { search, ingestion }
	}

	/// HTTP adapters built from `[provider]` and `[ingestion]`.
	pub fn from_config(cfg: &Config) -> Result<Self> {
		let search = HttpSearchProvider { client: SearchClient::new(&cfg.provider)? };
		let ingestion = HttpIngestionPipeline { client: IngestionClient::new(&cfg.ingestion)? };

		Ok(Self::new(Arc::new(search), Arc::new(ingestion)))
	}
}

struct HttpSearchProvider {
	client: SearchClient,
}
impl SearchProvider for HttpSearchProvider {
	fn search<'a>(
		&'a self,
		query: &'a SearchQuery,
		timeout: Duration,
	) -> BoxFuture<'a, std::result::Result<SearchResults, ProviderError>> {
		Box::pin(async move {
			self.client
				.search(&query.text, query.context.as_deref(), timeout)
				.await
				.map(|items| SearchResults { items })
				.map_err(|err| ProviderError {
					kind: err.kind(),
					message: err.to_string(),
					retry_after: err.retry_after(),
				})
		})
	}
}

struct HttpIngestionPipeline {
	client: IngestionClient,
}
impl IngestionPipeline for HttpIngestionPipeline {
	fn accept<'a>(
		&'a self,
		items: &'a [Value],
		request: &'a SearchRequest,
	) -> BoxFuture<'a, color_eyre::Result<IngestOutcome>> {
		Box::pin(async move {
			let query = request.query();
			let payload = IngestPayload {
				fingerprint: request.fingerprint(),
				query: &query.text,
				context: query.context.as_deref(),
				priority: request.priority().as_str(),
				items,
			};
			let outcome = match self.client.deliver(&payload).await? {
				Delivery::Accepted => IngestOutcome::Ack,
				Delivery::Rejected { status, reason } =>
					IngestOutcome::Reject { reason: format!("HTTP {status}: {reason}") },
			};

			Ok(outcome)
		})
	}
}

/// Producer and operator surface over one store.
pub struct FallbackSearchService {
	pub cfg: Config,
	pub store: Arc<dyn Store>,
	pub clock: Arc<dyn Clock>,
	pub quota: QuotaTracker,
	pub escalations: EscalationManager,
}
impl FallbackSearchService {
	pub fn new(cfg: Config, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
		let quota = QuotaTracker::new(store.clone(), clock.clone(), cfg.quota.daily_limit);
		let escalations = EscalationManager::new(store.clone(), clock.clone());

		Self { cfg, store, clock, quota, escalations }
	}

	/// Builds the worker loop sharing this service's store and clock.
	pub async fn scheduler(&self, providers: Providers) -> Result<Scheduler> {
		Scheduler::new(&self.cfg, self.store.clone(), self.clock.clone(), providers).await
	}

	/// Drops completed items older than `queue.completed_retention_days`.
	pub async fn purge_completed(&self) -> Result<u64> {
		let retention = time::Duration::days(self.cfg.queue.completed_retention_days);
		let before: OffsetDateTime = self.clock.now().saturating_sub(retention);
		let purged = self.store.purge_completed(before).await?;

		if purged > 0 {
			tracing::info!(count = purged, "Purged completed queue items.");
		}

		Ok(purged)
	}
}
