use std::time::Duration;

use fsq_domain::ErrorKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error("{message}")]
	InvalidResponse { message: String },
	#[error("Provider responded with HTTP {status}: {body}")]
	Status { status: u16, retry_after: Option<Duration>, body: String },
}
impl Error {
	/// 429 is the provider's own limit. 408, 5xx, network failures and unreadable bodies are
	/// worth retrying. Any other rejection is reported as permanent.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Status { status: 429, .. } => ErrorKind::Quota,
			Self::Status { status: 408, .. } => ErrorKind::Transient,
			Self::Status { status, .. } if *status >= 500 => ErrorKind::Transient,
			Self::Status { .. } => ErrorKind::Permanent,
			Self::Reqwest(_) | Self::SerdeJson(_) | Self::InvalidResponse { .. } =>
				ErrorKind::Transient,
			Self::InvalidHeaderName(_) | Self::InvalidHeaderValue(_) | Self::InvalidConfig { .. } =>
				ErrorKind::Permanent,
		}
	}

	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Status { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}
