use reqwest::{Client, header::HeaderMap};
use serde::Serialize;
use serde_json::Value;

use crate::Result;

/// Body posted to the downstream ingestion pipeline.
#[derive(Debug, Serialize)]
pub struct IngestPayload<'a> {
	pub fingerprint: &'a str,
	pub query: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context: Option<&'a str>,
	pub priority: &'a str,
	pub items: &'a [Value],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
	Accepted,
	Rejected { status: u16, reason: String },
}

#[derive(Debug, Clone)]
pub struct IngestionClient {
	client: Client,
	url: String,
	headers: HeaderMap,
}
impl IngestionClient {
	pub fn new(cfg: &fsq_config::ProviderConfig) -> Result<Self> {
		let (client, url, headers) = crate::build_client(cfg)?;

		Ok(Self { client, url, headers })
	}

	/// Any 2xx is an acknowledgement. Transport failures are returned as errors.
	pub async fn deliver(&self, payload: &IngestPayload<'_>) -> Result<Delivery> {
		let res =
			self.client.post(&self.url).headers(self.headers.clone()).json(payload).send().await?;

		if res.status().is_success() {
			return Ok(Delivery::Accepted);
		}

		match crate::status_error(res).await {
			crate::Error::Status { status, body, .. } =>
				Ok(Delivery::Rejected { status, reason: body }),
			err => Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn payload_omits_missing_context() {
		let items = vec![serde_json::json!({ "url": "https://a.example" })];
		let payload = IngestPayload {
			fingerprint: "abc",
			query: "rust",
			context: None,
			priority: "urgent",
			items: &items,
		};
		let json = serde_json::to_value(&payload).expect("serialize failed");

		assert_eq!(
			json,
			serde_json::json!({
				"fingerprint": "abc",
				"query": "rust",
				"priority": "urgent",
				"items": [{ "url": "https://a.example" }]
			})
		);
	}
}
