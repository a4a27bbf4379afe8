use serde::Deserialize;
use serde_json::{Map, Value};

pub const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub provider: ProviderConfig,
	pub ingestion: ProviderConfig,
	#[serde(default)]
	pub quota: Quota,
	#[serde(default)]
	pub scheduler: Scheduler,
	#[serde(default)]
	pub circuit: Circuit,
	#[serde(default)]
	pub retry: Retry,
	#[serde(default)]
	pub queue: Queue,
	#[serde(default)]
	pub security: Security,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

/// Connection settings shared by the search provider and the ingestion sink.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Quota {
	pub daily_limit: u32,
}
impl Default for Quota {
	fn default() -> Self {
		Self { daily_limit: 8_000 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scheduler {
	/// Optional. When unset the interval spreads `quota.daily_limit` evenly over a day.
	pub min_call_interval_ms: Option<u64>,
	pub stale_claim_timeout_ms: u64,
	pub provider_quota_defer_ms: u64,
}
impl Scheduler {
	pub fn effective_call_interval_ms(&self, daily_limit: u32) -> u64 {
		if let Some(interval) = self.min_call_interval_ms {
			return interval;
		}

		let limit = u64::from(daily_limit.max(1));

		(SECONDS_PER_DAY * 1_000).div_ceil(limit).div_ceil(1_000) * 1_000
	}
}
impl Default for Scheduler {
	fn default() -> Self {
		Self {
			min_call_interval_ms: None,
			stale_claim_timeout_ms: 120_000,
			provider_quota_defer_ms: 60_000,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Circuit {
	pub failure_threshold: u32,
	pub cooldown_ms: u64,
	pub max_cooldown_ms: u64,
}
impl Default for Circuit {
	fn default() -> Self {
		Self { failure_threshold: 5, cooldown_ms: 300_000, max_cooldown_ms: 3_600_000 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retry {
	pub escalation_threshold: u32,
	pub backoff_base_ms: u64,
	pub backoff_max_ms: u64,
	pub jitter_ratio: f64,
}
impl Default for Retry {
	fn default() -> Self {
		Self {
			escalation_threshold: 30,
			backoff_base_ms: 60_000,
			backoff_max_ms: SECONDS_PER_DAY * 1_000,
			jitter_ratio: 0.1,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Queue {
	pub completed_retention_days: i64,
}
impl Default for Queue {
	fn default() -> Self {
		Self { completed_retention_days: 30 }
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Security {
	pub bind_localhost_only: bool,
	pub api_auth_token: Option<String>,
	pub admin_auth_token: Option<String>,
}
