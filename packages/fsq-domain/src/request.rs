use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use unicode_normalization::UnicodeNormalization;

const FINGERPRINT_VERSION: &str = "fsq:v1";
const FIELD_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
	Urgent,
	#[default]
	Normal,
	Background,
}
impl Priority {
	/// Lower ranks are served first.
	pub fn rank(self) -> i16 {
		match self {
			Self::Urgent => 0,
			Self::Normal => 1,
			Self::Background => 2,
		}
	}

	pub fn from_rank(rank: i16) -> Option<Self> {
		match rank {
			0 => Some(Self::Urgent),
			1 => Some(Self::Normal),
			2 => Some(Self::Background),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Urgent => "urgent",
			Self::Normal => "normal",
			Self::Background => "background",
		}
	}
}
impl Display for Priority {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Opaque search payload. `context` scopes the query, e.g. the source that failed to resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
	pub text: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
}
impl SearchQuery {
	pub fn new(text: impl Into<String>, context: Option<String>) -> Self {
		Self { text: text.into(), context }
	}

	pub fn fingerprint(&self) -> String {
		let text = normalize_text(&self.text);
		let context = self.context.as_deref().map(normalize_context).unwrap_or_default();
		let mut hasher = blake3::Hasher::new();

		hasher.update(FINGERPRINT_VERSION.as_bytes());
		hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
		hasher.update(text.as_bytes());
		hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
		hasher.update(context.as_bytes());

		hasher.finalize().to_hex().to_string()
	}
}

/// Immutable once built; the fingerprint is derived from the query at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
	fingerprint: String,
	query: SearchQuery,
	priority: Priority,
	created_at: OffsetDateTime,
}
impl SearchRequest {
	pub fn new(query: SearchQuery, priority: Priority, created_at: OffsetDateTime) -> Self {
		Self { fingerprint: query.fingerprint(), query, priority, created_at }
	}

	/// Rehydrates a request read back from storage without recomputing the fingerprint.
	pub fn from_parts(
		fingerprint: String,
		query: SearchQuery,
		priority: Priority,
		created_at: OffsetDateTime,
	) -> Self {
		Self { fingerprint, query, priority, created_at }
	}

	pub fn fingerprint(&self) -> &str {
		&self.fingerprint
	}

	pub fn query(&self) -> &SearchQuery {
		&self.query
	}

	pub fn priority(&self) -> Priority {
		self.priority
	}

	pub fn created_at(&self) -> OffsetDateTime {
		self.created_at
	}
}

/// NFKC, lowercase, whitespace runs collapsed to one space. URLs inside the text are not
/// canonicalized.
pub fn normalize_text(text: &str) -> String {
	let folded: String = text.nfkc().collect::<String>().to_lowercase();

	folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_context(context: &str) -> String {
	context.trim().to_lowercase()
}
