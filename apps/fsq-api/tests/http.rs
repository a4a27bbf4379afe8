use std::sync::Arc;

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode, header},
};
use serde_json::{Map, Value};
use time::macros::datetime;
use tower::util::ServiceExt;

use fsq_api::{routes, state::AppState};
use fsq_config::{
	Circuit, Config, Postgres, ProviderConfig, Queue, Quota, Retry, Scheduler, Security, Service,
	Storage,
};
use fsq_domain::{
	Clock, ErrorKind, ItemError, ManualClock, Priority, RetryPolicy, SearchQuery, SearchRequest,
};
use fsq_service::FallbackSearchService;
use fsq_storage::{MemoryStore, QueueStore};

fn provider(name: &str) -> ProviderConfig {
	ProviderConfig {
		api_base: "http://127.0.0.1:9".to_string(),
		api_key: "test-key".to_string(),
		path: format!("/v1/{name}"),
		timeout_ms: 5_000,
		default_headers: Map::new(),
	}
}

fn test_config(security: Security) -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: Storage {
			postgres: Postgres { dsn: "postgres://unused".to_string(), pool_max_conns: 1 },
		},
		provider: provider("search"),
		ingestion: provider("ingestion"),
		quota: Quota::default(),
		scheduler: Scheduler::default(),
		circuit: Circuit::default(),
		retry: Retry::default(),
		queue: Queue::default(),
		security,
	}
}

struct TestApp {
	public: Router,
	admin: Router,
	store: Arc<MemoryStore>,
	clock: Arc<ManualClock>,
}
impl TestApp {
	fn new(security: Security) -> Self {
		let store = Arc::new(MemoryStore::new());
		let clock = Arc::new(ManualClock::new(datetime!(2026-05-01 09:00 UTC)));
		let service = FallbackSearchService::new(test_config(security), store.clone(), clock.clone());
		let state = AppState::from_service(service);

		Self {
			public: routes::router(state.clone()),
			admin: routes::admin_router(state),
			store,
			clock,
		}
	}

	/// Drives one item straight to escalation and returns its fingerprint.
	async fn escalate(&self, query: &str) -> String {
		let now = self.clock.now();
		let request = SearchRequest::new(SearchQuery::new(query, None), Priority::Normal, now);
		let item_id = self.store.enqueue(&request, now).await.expect("enqueue").item_id();
		let policy = RetryPolicy { escalation_threshold: 1, ..RetryPolicy::default() };

		self.store.claim_next(now).await.expect("claim").expect("claimed item");
		self.store
			.record_failure(
				item_id,
				ItemError::new(ErrorKind::Permanent, "provider rejected query"),
				&policy,
				now,
			)
			.await
			.expect("record failure");

		request.fingerprint().to_string()
	}
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
	let response = router.clone().oneshot(request).await.expect("Failed to call router.");
	let status = response.status();
	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("Failed to read body.");
	let json = if bytes.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&bytes).expect("Response body is not JSON.")
	};

	(status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.expect("Failed to build request.")
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).expect("Failed to build request.")
}

fn with_token(mut request: Request<Body>, token: &str) -> Request<Body> {
	request.headers_mut().insert(
		header::AUTHORIZATION,
		format!("Bearer {token}").parse().expect("Invalid header value."),
	);

	request
}

#[tokio::test]
async fn health_is_open_even_with_a_token() {
	let app = TestApp::new(Security {
		api_auth_token: Some("public-secret".to_string()),
		..Security::default()
	});
	let (status, _) = send(&app.public, get("/health")).await;

	assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn submit_reports_inserted_then_duplicate() {
	let app = TestApp::new(Security::default());
	let (status, first) = send(
		&app.public,
		post_json("/v1/requests", serde_json::json!({ "query": "Rust HTTP clients", "priority": "urgent" })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(first["status"], "inserted");

	let (status, second) =
		send(&app.public, post_json("/v1/requests", serde_json::json!({ "query": "rust http  clients" })))
			.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(second["status"], "duplicate");
	assert_eq!(second["item_id"], first["item_id"]);
	assert_eq!(second["fingerprint"], first["fingerprint"]);

	let (status, body) = send(&app.public, get("/v1/status")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["queue"]["pending"], 1);
	assert_eq!(body["quota"]["daily_limit"], 8_000);
	assert_eq!(body["circuit"]["status"], "closed");
}

#[tokio::test]
async fn invalid_submissions_map_to_invalid_request() {
	let app = TestApp::new(Security::default());
	let (status, body) =
		send(&app.public, post_json("/v1/requests", serde_json::json!({ "query": "   " }))).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error_code"], "invalid_request");
	assert_eq!(body["fields"], serde_json::json!(["query"]));

	let malformed = Request::builder()
		.method("POST")
		.uri("/v1/requests")
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from("{\"query\":"))
		.expect("Failed to build request.");
	let (status, body) = send(&app.public, malformed).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error_code"], "invalid_request");
}

#[tokio::test]
async fn public_routes_require_the_configured_token() {
	let app = TestApp::new(Security {
		api_auth_token: Some("public-secret".to_string()),
		..Security::default()
	});
	let (status, body) = send(&app.public, get("/v1/status")).await;

	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body["error_code"], "unauthorized");

	let (status, _) = send(&app.public, with_token(get("/v1/status"), "wrong")).await;

	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, _) = send(&app.public, with_token(get("/v1/status"), "public-secret")).await;

	assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_token_is_independent_of_the_public_token() {
	let app = TestApp::new(Security {
		api_auth_token: Some("public-secret".to_string()),
		admin_auth_token: Some("admin-secret".to_string()),
		..Security::default()
	});
	let (status, _) =
		send(&app.admin, with_token(get("/v1/admin/escalations"), "public-secret")).await;

	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, body) =
		send(&app.admin, with_token(get("/v1/admin/escalations"), "admin-secret")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["items"], Value::Array(Vec::new()));
}

#[tokio::test]
async fn admin_lists_and_requeues_escalations() {
	let app = TestApp::new(Security::default());
	let fingerprint = app.escalate("unreachable provider query").await;
	let (status, body) = send(&app.admin, get("/v1/admin/escalations")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["items"][0]["fingerprint"], fingerprint.as_str());
	assert_eq!(body["items"][0]["total_attempts"], 1);
	assert_eq!(body["items"][0]["history"], serde_json::json!(["permanent"]));

	let (status, body) =
		send(&app.admin, get(&format!("/v1/admin/escalations/{fingerprint}"))).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["query"], "unreachable provider query");

	let (status, body) = send(
		&app.admin,
		post_json("/v1/admin/escalations/requeue", serde_json::json!({ "fingerprint": fingerprint })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["action"], "requeued");

	let (_, body) = send(&app.public, get("/v1/status")).await;

	assert_eq!(body["queue"]["pending"], 1);
	assert_eq!(body["queue"]["escalated"], 0);
}

#[tokio::test]
async fn admin_resolves_escalations_and_reports_missing_ones() {
	let app = TestApp::new(Security::default());
	let fingerprint = app.escalate("abandoned query").await;
	let resolve =
		|fp: &str| post_json("/v1/admin/escalations/resolve", serde_json::json!({ "fingerprint": fp }));
	let (status, body) = send(&app.admin, resolve(&fingerprint)).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["action"], "resolved");

	let (status, body) = send(&app.admin, resolve(&fingerprint)).await;

	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["error_code"], "not_found");

	let (status, _) =
		send(&app.admin, get(&format!("/v1/admin/escalations/{fingerprint}"))).await;

	assert_eq!(status, StatusCode::NOT_FOUND);
	assert!(app.store.items().is_empty());
}

#[tokio::test]
async fn escalation_list_limit_is_bounded() {
	let app = TestApp::new(Security::default());
	let (status, body) = send(&app.admin, get("/v1/admin/escalations?limit=0")).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error_code"], "invalid_request");
	assert_eq!(body["fields"], serde_json::json!(["limit"]));

	let (status, body) = send(&app.admin, get("/v1/admin/escalations?limit=many")).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error_code"], "invalid_request");
}

#[tokio::test]
async fn blank_fingerprint_names_the_offending_field() {
	let app = TestApp::new(Security::default());
	let (status, body) = send(
		&app.admin,
		post_json("/v1/admin/escalations/resolve", serde_json::json!({ "fingerprint": "  " })),
	)
	.await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error_code"], "invalid_request");
	assert_eq!(body["fields"], serde_json::json!(["fingerprint"]));
}
