pub mod ingestion;
pub mod search;

mod error;

pub use error::{Error, Result};

use std::time::Duration;

use reqwest::{
	Client, Response,
	header::{AUTHORIZATION, HeaderMap, HeaderName, RETRY_AFTER},
};
use serde_json::{Map, Value};

const MAX_ERROR_BODY_CHARS: usize = 256;
const MAX_RETRY_AFTER_SECS: u64 = 30 * 86_400;

pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: format!("Default header {key:?} must be a string."),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

fn build_client(cfg: &fsq_config::ProviderConfig) -> Result<(Client, String, HeaderMap)> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let headers = auth_headers(&cfg.api_key, &cfg.default_headers)?;

	Ok((client, url, headers))
}

/// Turns a non-success response into [`Error::Status`], keeping a short body excerpt.
async fn status_error(res: Response) -> Error {
	let status = res.status().as_u16();
	let retry_after = parse_retry_after(res.headers());
	let body = res.text().await.unwrap_or_default();
	let body = body.chars().take(MAX_ERROR_BODY_CHARS).collect();

	Error::Status { status, retry_after, body }
}

/// Only the delay-seconds form is understood; HTTP dates fall back to the configured defer.
/// Hints longer than thirty days are clamped.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	headers
		.get(RETRY_AFTER)
		.and_then(|value| value.to_str().ok())
		.and_then(|raw| raw.trim().parse::<u64>().ok())
		.map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}
