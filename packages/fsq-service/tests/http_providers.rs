mod support;

use axum::{
	Json, Router,
	http::{StatusCode, header},
	routing,
};
use serde_json::Value;
use time::Duration;
use tokio::{
	net::TcpListener,
	sync::oneshot::{self, Sender},
};

use fsq_domain::{ErrorKind, ItemState, Priority};
use fsq_service::{Providers, Scheduler, TickOutcome};

use support::{Harness, START, test_config};

async fn start_upstream_server() -> (String, Sender<()>) {
	let app = Router::new()
		.route(
			"/search/ok",
			routing::post(|Json(payload): Json<Value>| async move {
				Json(serde_json::json!({ "items": [{ "query": payload["query"] }] }))
			}),
		)
		.route(
			"/search/quota",
			routing::post(|| async {
				(StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "7")], "slow down")
			}),
		)
		.route(
			"/ingest/accept",
			routing::post(|Json(payload): Json<Value>| async move {
				if payload["items"].as_array().is_some_and(|items| items.len() == 1) {
					StatusCode::ACCEPTED
				} else {
					StatusCode::BAD_REQUEST
				}
			}),
		)
		.route(
			"/ingest/reject",
			routing::post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "schema mismatch") }),
		);
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind upstream server.");
	let addr = listener.local_addr().expect("Failed to read upstream server address.");
	let (tx, rx) = oneshot::channel();
	let server = axum::serve(listener, app).with_graceful_shutdown(async move {
		let _ = rx.await;
	});

	tokio::spawn(async move {
		let _ = server.into_future().await;
	});

	(format!("http://{addr}"), tx)
}

/// A harness whose scheduler talks HTTP to the local upstream server.
async fn http_harness(
	api_base: &str,
	search_path: &str,
	ingest_path: &str,
) -> (Harness, Scheduler) {
	let mut cfg = test_config();

	cfg.provider.api_base = api_base.to_string();
	cfg.provider.path = search_path.to_string();
	cfg.ingestion.api_base = api_base.to_string();
	cfg.ingestion.path = ingest_path.to_string();

	let harness = Harness::new(cfg).await;
	let providers =
		Providers::from_config(&harness.service.cfg).expect("Failed to build HTTP providers.");
	let scheduler =
		harness.service.scheduler(providers).await.expect("Failed to build scheduler.");

	(harness, scheduler)
}

#[tokio::test]
async fn accepted_delivery_completes_the_item() {
	let (api_base, shutdown) = start_upstream_server().await;
	let (harness, scheduler) = http_harness(&api_base, "/search/ok", "/ingest/accept").await;
	let item_id = harness.submit("rust http clients", Priority::Normal).await;

	assert_eq!(scheduler.tick().await, TickOutcome::Completed { item_id });
	assert_eq!(harness.store.items().pop().expect("item").state, ItemState::Completed);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn provider_429_defers_by_its_retry_after() {
	let (api_base, shutdown) = start_upstream_server().await;
	let (harness, scheduler) = http_harness(&api_base, "/search/quota", "/ingest/accept").await;
	let item_id = harness.submit("rate limited", Priority::Normal).await;

	assert_eq!(
		scheduler.tick().await,
		TickOutcome::Deferred { item_id, until: START + Duration::seconds(7) }
	);

	let item = harness.store.items().pop().expect("item");

	assert_eq!((item.state, item.attempt), (ItemState::Pending, 0));
	assert_eq!(scheduler.breaker().state().await.consecutive_failures, 0);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn ingestion_422_requeues_as_transient() {
	let (api_base, shutdown) = start_upstream_server().await;
	let (harness, scheduler) = http_harness(&api_base, "/search/ok", "/ingest/reject").await;
	let item_id = harness.submit("unwanted results", Priority::Normal).await;
	let TickOutcome::Retried { item_id: retried, attempt: 1, .. } = scheduler.tick().await else {
		panic!("Expected the rejected delivery to be retried.");
	};

	assert_eq!(retried, item_id);
	assert_eq!(scheduler.breaker().state().await.consecutive_failures, 0);

	let item = harness.store.items().pop().expect("item");
	let error = item.last_error.expect("last error");

	assert_eq!(item.state, ItemState::Pending);
	assert_eq!(error.kind, ErrorKind::Transient);
	assert!(error.message.contains("HTTP 422: schema mismatch"));

	let _ = shutdown.send(());
}
