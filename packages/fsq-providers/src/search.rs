use std::time::Duration;

use reqwest::{Client, header::HeaderMap};
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
	query: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	context: Option<&'a str>,
}

/// HTTP client for the rate-limited search provider.
#[derive(Debug, Clone)]
pub struct SearchClient {
	client: Client,
	url: String,
	headers: HeaderMap,
}
impl SearchClient {
	pub fn new(cfg: &fsq_config::ProviderConfig) -> Result<Self> {
		let (client, url, headers) = crate::build_client(cfg)?;

		Ok(Self { client, url, headers })
	}

	/// `timeout` overrides the client default for this call.
	pub async fn search(
		&self,
		query: &str,
		context: Option<&str>,
		timeout: Duration,
	) -> Result<Vec<Value>> {
		let res = self
			.client
			.post(&self.url)
			.timeout(timeout)
			.headers(self.headers.clone())
			.json(&SearchBody { query, context })
			.send()
			.await?;

		if !res.status().is_success() {
			return Err(crate::status_error(res).await);
		}

		let bytes = res.bytes().await?;
		let json: Value = serde_json::from_slice(&bytes)?;

		parse_search_response(json)
	}
}

fn parse_search_response(json: Value) -> Result<Vec<Value>> {
	match json {
		Value::Object(mut map) => match map.remove("items") {
			Some(Value::Array(items)) => Ok(items),
			Some(_) => Err(Error::InvalidResponse {
				message: "Search response items must be an array.".to_string(),
			}),
			None => Err(Error::InvalidResponse {
				message: "Search response is missing items array.".to_string(),
			}),
		},
		_ => Err(Error::InvalidResponse {
			message: "Search response must be a JSON object.".to_string(),
		}),
	}
}

#[cfg(test)]
mod tests {
	use fsq_domain::ErrorKind;

	use super::*;

	#[test]
	fn extracts_items_array() {
		let json = serde_json::json!({ "items": [{ "url": "https://a.example" }, { "url": "b" }] });
		let items = parse_search_response(json).expect("parse failed");

		assert_eq!(items.len(), 2);
		assert_eq!(items[0]["url"], "https://a.example");
	}

	#[test]
	fn empty_items_are_a_valid_answer() {
		let items = parse_search_response(serde_json::json!({ "items": [] })).expect("parse failed");

		assert!(items.is_empty());
	}

	#[test]
	fn malformed_bodies_are_transient() {
		for json in [serde_json::json!({ "results": [] }), serde_json::json!({ "items": "x" })] {
			let err = parse_search_response(json).expect_err("should fail");

			assert_eq!(err.kind(), ErrorKind::Transient);
		}
	}

	#[test]
	fn statuses_map_onto_error_kinds() {
		let status = |status, retry_after| Error::Status { status, retry_after, body: String::new() };

		assert_eq!(status(429, Some(Duration::from_secs(30))).kind(), ErrorKind::Quota);
		assert_eq!(
			status(429, Some(Duration::from_secs(30))).retry_after(),
			Some(Duration::from_secs(30))
		);
		assert_eq!(status(408, None).kind(), ErrorKind::Transient);
		assert_eq!(status(503, None).kind(), ErrorKind::Transient);
		assert_eq!(status(400, None).kind(), ErrorKind::Permanent);
		assert_eq!(status(404, None).kind(), ErrorKind::Permanent);
	}
}
