use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use fsq_domain::{Clock, ErrorKind, EscalationRecord, ItemError, Priority};
use fsq_storage::Store;

use crate::{Error, FallbackSearchService, Result};

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1_000;

/// Operator access to items that exhausted automatic retries.
#[derive(Clone)]
pub struct EscalationManager {
	store: Arc<dyn Store>,
	clock: Arc<dyn Clock>,
}
impl EscalationManager {
	pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
		Self { store, clock }
	}

	/// Oldest escalation first.
	pub async fn list_pending(&self, limit: u32) -> Result<Vec<EscalationRecord>> {
		Ok(self.store.list_escalations(limit).await?)
	}

	pub async fn get(&self, fingerprint: &str) -> Result<Option<EscalationRecord>> {
		Ok(self.store.get_escalation(fingerprint).await?)
	}

	/// Removes the record and its item. `false` when nothing was escalated under `fingerprint`.
	pub async fn resolve(&self, fingerprint: &str) -> Result<bool> {
		let item_id = self.store.resolve_escalation(fingerprint).await?;

		if let Some(item_id) = item_id {
			tracing::info!(%item_id, fingerprint, "Escalation resolved by operator.");
		}

		Ok(item_id.is_some())
	}

	/// Returns the item to the queue with a fresh retry budget.
	pub async fn requeue(&self, fingerprint: &str) -> Result<bool> {
		let item_id = self.store.requeue_escalation(fingerprint, self.clock.now()).await?;

		if let Some(item_id) = item_id {
			tracing::info!(%item_id, fingerprint, "Escalated item requeued by operator.");
		}

		Ok(item_id.is_some())
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EscalationListRequest {
	#[serde(default)]
	pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EscalationListResponse {
	pub items: Vec<EscalationView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EscalationView {
	pub fingerprint: String,
	pub item_id: Uuid,
	pub query: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
	pub priority: Priority,
	pub total_attempts: u32,
	pub history: Vec<ErrorKind>,
	pub last_error: Option<ItemError>,
	#[serde(with = "crate::time_serde")]
	pub first_failed_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub last_failed_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub escalated_at: OffsetDateTime,
}
impl From<EscalationRecord> for EscalationView {
	fn from(record: EscalationRecord) -> Self {
		let query = record.request.query();

		Self {
			fingerprint: record.fingerprint().to_string(),
			item_id: record.item_id,
			query: query.text.clone(),
			context: query.context.clone(),
			priority: record.request.priority(),
			total_attempts: record.total_attempts,
			history: record.history,
			last_error: record.last_error,
			first_failed_at: record.first_failed_at,
			last_failed_at: record.last_failed_at,
			escalated_at: record.escalated_at,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct EscalationActionRequest {
	pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
	Resolved,
	Requeued,
}

#[derive(Debug, Clone, Serialize)]
pub struct EscalationActionResponse {
	pub fingerprint: String,
	pub action: EscalationAction,
}

impl FallbackSearchService {
	pub async fn list_escalations(
		&self,
		req: EscalationListRequest,
	) -> Result<EscalationListResponse> {
		let limit = req.limit.unwrap_or(DEFAULT_LIST_LIMIT);

		if limit == 0 || limit > MAX_LIST_LIMIT {
			return Err(Error::InvalidField {
				field: "limit".to_string(),
				message: format!("limit must be between 1 and {MAX_LIST_LIMIT}."),
			});
		}

		let records = self.escalations.list_pending(limit).await?;

		Ok(EscalationListResponse { items: records.into_iter().map(EscalationView::from).collect() })
	}

	pub async fn get_escalation(&self, fingerprint: &str) -> Result<EscalationView> {
		self.escalations
			.get(fingerprint)
			.await?
			.map(EscalationView::from)
			.ok_or_else(|| not_found(fingerprint))
	}

	pub async fn resolve_escalation(
		&self,
		req: EscalationActionRequest,
	) -> Result<EscalationActionResponse> {
		let fingerprint = required_fingerprint(&req)?;

		if !self.escalations.resolve(fingerprint).await? {
			return Err(not_found(fingerprint));
		}

		Ok(EscalationActionResponse {
			fingerprint: fingerprint.to_string(),
			action: EscalationAction::Resolved,
		})
	}

	pub async fn requeue_escalation(
		&self,
		req: EscalationActionRequest,
	) -> Result<EscalationActionResponse> {
		let fingerprint = required_fingerprint(&req)?;

		if !self.escalations.requeue(fingerprint).await? {
			return Err(not_found(fingerprint));
		}

		Ok(EscalationActionResponse {
			fingerprint: fingerprint.to_string(),
			action: EscalationAction::Requeued,
		})
	}
}

fn required_fingerprint(req: &EscalationActionRequest) -> Result<&str> {
	let fingerprint = req.fingerprint.trim();

	if fingerprint.is_empty() {
		return Err(Error::InvalidField {
			field: "fingerprint".to_string(),
			message: "fingerprint must be non-empty.".to_string(),
		});
	}

	Ok(fingerprint)
}

fn not_found(fingerprint: &str) -> Error {
	Error::NotFound { message: format!("No escalation for fingerprint {fingerprint}.") }
}
