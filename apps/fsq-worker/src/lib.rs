pub mod worker;

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fsq_domain::SystemClock;
use fsq_service::{FallbackSearchService, Providers};
use fsq_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = fsq_cli::VERSION,
	rename_all = "kebab",
	styles = fsq_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = fsq_config::load(&args.config)?;

	init_tracing(&config);

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema().await?;

	let providers = Providers::from_config(&config)?;
	let service = Arc::new(FallbackSearchService::new(config, Arc::new(db), Arc::new(SystemClock)));
	let scheduler = service.scheduler(providers).await?;
	let state = worker::WorkerState { service, scheduler };

	worker::run_worker(&state, async {
		if let Err(err) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %err, "Failed to listen for the shutdown signal.");
		}

		tracing::info!("Shutdown signal received.");
	})
	.await;

	Ok(())
}

fn init_tracing(config: &fsq_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
