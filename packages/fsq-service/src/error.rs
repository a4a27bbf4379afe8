pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Invalid request: {message}")]
	InvalidField { field: String, message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<fsq_storage::Error> for Error {
	fn from(err: fsq_storage::Error) -> Self {
		match err {
			fsq_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			fsq_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			fsq_storage::Error::NotFound(message) => Self::NotFound { message },
			fsq_storage::Error::Conflict(message) => Self::Conflict { message },
			fsq_storage::Error::InvalidState(message) => Self::Storage { message },
		}
	}
}
impl From<fsq_providers::Error> for Error {
	fn from(err: fsq_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
