use std::sync::Arc;

use fsq_domain::SystemClock;
use fsq_service::FallbackSearchService;
use fsq_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<FallbackSearchService>,
}
impl AppState {
	pub async fn new(config: fsq_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let service = FallbackSearchService::new(config, Arc::new(db), Arc::new(SystemClock));

		Ok(Self::from_service(service))
	}

	pub fn from_service(service: FallbackSearchService) -> Self {
		Self { service: Arc::new(service) }
	}
}
