use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fsq_domain::{EnqueueOutcome, Priority, SearchQuery, SearchRequest};

use crate::{Error, FallbackSearchService, Result};

const MAX_QUERY_CHARS: usize = 2_048;

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
	pub query: String,
	#[serde(default)]
	pub context: Option<String>,
	#[serde(default)]
	pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
	Inserted,
	Duplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
	pub fingerprint: String,
	pub item_id: Uuid,
	pub status: SubmitStatus,
}

impl FallbackSearchService {
	/// Queues a search that the primary path could not serve. Resubmitting a query that is
	/// still queued returns the existing item.
	pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitResponse> {
		let text = req.query.trim();

		if text.is_empty() {
			return Err(Error::InvalidField {
				field: "query".to_string(),
				message: "query must be non-empty.".to_string(),
			});
		}
		if text.chars().count() > MAX_QUERY_CHARS {
			return Err(Error::InvalidField {
				field: "query".to_string(),
				message: format!("query must be at most {MAX_QUERY_CHARS} characters."),
			});
		}

		let context = req.context.map(|context| context.trim().to_string());
		let context = context.filter(|context| !context.is_empty());
		let request = SearchRequest::new(
			SearchQuery::new(text, context),
			req.priority.unwrap_or_default(),
			self.clock.now(),
		);
		let outcome = self.store.enqueue(&request, self.clock.now()).await?;
		let status = match outcome {
			EnqueueOutcome::Inserted { .. } => SubmitStatus::Inserted,
			EnqueueOutcome::Duplicate { .. } => SubmitStatus::Duplicate,
		};

		tracing::debug!(
			item_id = %outcome.item_id(),
			fingerprint = request.fingerprint(),
			priority = %request.priority(),
			?status,
			"Search request submitted."
		);

		Ok(SubmitResponse {
			fingerprint: request.fingerprint().to_string(),
			item_id: outcome.item_id(),
			status,
		})
	}
}
