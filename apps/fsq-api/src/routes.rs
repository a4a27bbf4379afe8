use std::sync::Arc;

use axum::{
	Json, Router,
	extract::{
		Path, Query, Request, State,
		rejection::{JsonRejection, QueryRejection},
	},
	http::{HeaderMap, StatusCode, header},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use fsq_service::{
	EscalationActionRequest, EscalationActionResponse, EscalationListRequest,
	EscalationListResponse, EscalationView, Error as ServiceError, StatusResponse, SubmitRequest,
	SubmitResponse,
};

use crate::state::AppState;

/// Public surface: enqueue and status. `/health` is never guarded.
pub fn router(state: AppState) -> Router {
	let token = bearer_guard(state.service.cfg.security.api_auth_token.as_deref());

	Router::new()
		.route("/v1/requests", post(submit))
		.route("/v1/status", get(status))
		.route_layer(middleware::from_fn_with_state(token, require_bearer))
		.route("/health", get(health))
		.with_state(state)
}

/// Operator surface for escalated items.
pub fn admin_router(state: AppState) -> Router {
	let token = bearer_guard(state.service.cfg.security.admin_auth_token.as_deref());

	Router::new()
		.route("/v1/admin/escalations", get(list_escalations))
		.route("/v1/admin/escalations/resolve", post(resolve_escalation))
		.route("/v1/admin/escalations/requeue", post(requeue_escalation))
		.route("/v1/admin/escalations/{fingerprint}", get(get_escalation))
		.route_layer(middleware::from_fn_with_state(token, require_bearer))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn submit(
	State(state): State<AppState>,
	payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
	let Json(req) = payload?;
	let response = state.service.submit(req).await?;

	Ok(Json(response))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
	let response = state.service.status().await?;

	Ok(Json(response))
}

async fn list_escalations(
	State(state): State<AppState>,
	query: Result<Query<EscalationListRequest>, QueryRejection>,
) -> Result<Json<EscalationListResponse>, ApiError> {
	let Query(req) = query?;
	let response = state.service.list_escalations(req).await?;

	Ok(Json(response))
}

async fn get_escalation(
	State(state): State<AppState>,
	Path(fingerprint): Path<String>,
) -> Result<Json<EscalationView>, ApiError> {
	let response = state.service.get_escalation(&fingerprint).await?;

	Ok(Json(response))
}

async fn resolve_escalation(
	State(state): State<AppState>,
	payload: Result<Json<EscalationActionRequest>, JsonRejection>,
) -> Result<Json<EscalationActionResponse>, ApiError> {
	let Json(req) = payload?;
	let response = state.service.resolve_escalation(req).await?;

	Ok(Json(response))
}

async fn requeue_escalation(
	State(state): State<AppState>,
	payload: Result<Json<EscalationActionRequest>, JsonRejection>,
) -> Result<Json<EscalationActionResponse>, ApiError> {
	let Json(req) = payload?;
	let response = state.service.requeue_escalation(req).await?;

	Ok(Json(response))
}

/// `None` disables the guard.
type BearerToken = Option<Arc<str>>;

fn bearer_guard(token: Option<&str>) -> BearerToken {
	token.map(Arc::from)
}

async fn require_bearer(
	State(expected): State<BearerToken>,
	req: Request,
	next: Next,
) -> Result<Response, ApiError> {
	if let Some(expected) = expected.as_deref()
		&& bearer_token(req.headers()) != Some(expected)
	{
		return Err(json_error(
			StatusCode::UNAUTHORIZED,
			"unauthorized",
			"A valid bearer token is required.",
			None,
		));
	}

	Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	let token = value.strip_prefix("Bearer ")?.trim();

	(!token.is_empty()).then_some(token)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), fields }
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } =>
				json_error(StatusCode::BAD_REQUEST, "invalid_request", message, None),
			ServiceError::InvalidField { field, message } =>
				json_error(StatusCode::BAD_REQUEST, "invalid_request", message, Some(vec![field])),
			ServiceError::NotFound { message } =>
				json_error(StatusCode::NOT_FOUND, "not_found", message, None),
			ServiceError::Conflict { message } =>
				json_error(StatusCode::CONFLICT, "conflict", message, None),
			ServiceError::Provider { message } =>
				json_error(StatusCode::BAD_GATEWAY, "provider_error", message, None),
			ServiceError::Storage { message } => {
				tracing::error!(error = %message, "Storage request failed.");

				json_error(
					StatusCode::INTERNAL_SERVER_ERROR,
					"storage_error",
					"Storage is unavailable.",
					None,
				)
			},
		}
	}
}
impl From<JsonRejection> for ApiError {
	fn from(err: JsonRejection) -> Self {
		json_error(StatusCode::BAD_REQUEST, "invalid_request", err.body_text(), None)
	}
}
impl From<QueryRejection> for ApiError {
	fn from(err: QueryRejection) -> Self {
		json_error(StatusCode::BAD_REQUEST, "invalid_request", err.body_text(), None)
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}

pub fn json_error(
	status: StatusCode,
	code: &str,
	message: impl Into<String>,
	fields: Option<Vec<String>>,
) -> ApiError {
	ApiError::new(status, code, message, fields)
}
