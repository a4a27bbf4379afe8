mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Circuit, Config, Postgres, ProviderConfig, Queue, Quota, Retry, SECONDS_PER_DAY, Scheduler,
	Security, Service, Storage,
};

use std::{fs, path::Path};

/// Upper bound for every configured delay, so scheduling arithmetic stays inside calendar range.
pub const MAX_DELAY_MS: u64 = 30 * SECONDS_PER_DAY * 1_000;
pub const MAX_RETENTION_DAYS: i64 = 3_650;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in
		[("service.http_bind", &cfg.service.http_bind), ("service.admin_bind", &cfg.service.admin_bind)]
	{
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}

	for (label, provider) in [("provider", &cfg.provider), ("ingestion", &cfg.ingestion)] {
		if provider.api_base.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("{label}.api_base must be non-empty."),
			});
		}
		if provider.api_key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("{label}.api_key must be non-empty."),
			});
		}
		if provider.timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("{label}.timeout_ms must be greater than zero."),
			});
		}
	}

	for (label, value) in [
		("provider.timeout_ms", cfg.provider.timeout_ms),
		("ingestion.timeout_ms", cfg.ingestion.timeout_ms),
		("scheduler.min_call_interval_ms", cfg.scheduler.min_call_interval_ms.unwrap_or(0)),
		("scheduler.stale_claim_timeout_ms", cfg.scheduler.stale_claim_timeout_ms),
		("scheduler.provider_quota_defer_ms", cfg.scheduler.provider_quota_defer_ms),
		("circuit.max_cooldown_ms", cfg.circuit.max_cooldown_ms),
		("retry.backoff_max_ms", cfg.retry.backoff_max_ms),
	] {
		if value > MAX_DELAY_MS {
			return Err(Error::Validation {
				message: format!("{label} must be less than or equal to {MAX_DELAY_MS}."),
			});
		}
	}

	if cfg.quota.daily_limit == 0 {
		return Err(Error::Validation {
			message: "quota.daily_limit must be greater than zero.".to_string(),
		});
	}
	if let Some(interval) = cfg.scheduler.min_call_interval_ms
		&& interval == 0
	{
		return Err(Error::Validation {
			message: "scheduler.min_call_interval_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.scheduler.stale_claim_timeout_ms <= cfg.provider.timeout_ms {
		return Err(Error::Validation {
			message: "scheduler.stale_claim_timeout_ms must be greater than provider.timeout_ms."
				.to_string(),
		});
	}
	if cfg.scheduler.provider_quota_defer_ms == 0 {
		return Err(Error::Validation {
			message: "scheduler.provider_quota_defer_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.circuit.failure_threshold == 0 {
		return Err(Error::Validation {
			message: "circuit.failure_threshold must be greater than zero.".to_string(),
		});
	}
	if cfg.circuit.cooldown_ms == 0 {
		return Err(Error::Validation {
			message: "circuit.cooldown_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.circuit.cooldown_ms > cfg.circuit.max_cooldown_ms {
		return Err(Error::Validation {
			message: "circuit.cooldown_ms must be less than or equal to circuit.max_cooldown_ms."
				.to_string(),
		});
	}
	if cfg.retry.escalation_threshold == 0 {
		return Err(Error::Validation {
			message: "retry.escalation_threshold must be greater than zero.".to_string(),
		});
	}
	if cfg.retry.backoff_base_ms == 0 {
		return Err(Error::Validation {
			message: "retry.backoff_base_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.retry.backoff_base_ms > cfg.retry.backoff_max_ms {
		return Err(Error::Validation {
			message: "retry.backoff_base_ms must be less than or equal to retry.backoff_max_ms."
				.to_string(),
		});
	}
	if !cfg.retry.jitter_ratio.is_finite() {
		return Err(Error::Validation {
			message: "retry.jitter_ratio must be a finite number.".to_string(),
		});
	}
	if !(0.0..0.5).contains(&cfg.retry.jitter_ratio) {
		return Err(Error::Validation {
			message: "retry.jitter_ratio must be in the range 0.0-0.5.".to_string(),
		});
	}
	if cfg.queue.completed_retention_days <= 0 {
		return Err(Error::Validation {
			message: "queue.completed_retention_days must be greater than zero.".to_string(),
		});
	}
	if cfg.queue.completed_retention_days > MAX_RETENTION_DAYS {
		return Err(Error::Validation {
			message: format!(
				"queue.completed_retention_days must be less than or equal to {MAX_RETENTION_DAYS}."
			),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.security.api_auth_token.as_deref().map(|token| token.trim().is_empty()).unwrap_or(false)
	{
		cfg.security.api_auth_token = None;
	}
	if cfg
		.security
		.admin_auth_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.admin_auth_token = None;
	}

	cfg.provider.api_base = cfg.provider.api_base.trim_end_matches('/').to_string();
	cfg.ingestion.api_base = cfg.ingestion.api_base.trim_end_matches('/').to_string();
}
