// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP API
//!
//! JSON over axum. The acting organization is named by the `x-org-id`
//! header; every handler resolves it before touching a service. Errors are
//! rendered as `{ "error": <kind>, "message": <text> }`.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use crate::application::bulk_renewal::BulkRenewalOrchestrator;
use crate::application::fleet_service::FleetService;
use crate::application::quote_coordinator::QuoteCoordinator;
use crate::application::request_lifecycle::{
    CreateRequestCommand, RequestLifecycleService, RequestScope,
};
use crate::domain::device::DeviceId;
use crate::domain::error::RenewalError;
use crate::domain::organization::{OrgId, Organization};
use crate::domain::quote::{MarginPercent, QuoteArtifact};
use crate::domain::renewal::BulkRenewalCommand;
use crate::domain::repository::OrganizationRepository;
use crate::domain::request::RequestId;

/// Header carrying the acting organization's id
pub const ORG_HEADER: &str = "x-org-id";

pub struct AppState {
    pub organizations: Arc<dyn OrganizationRepository>,
    pub fleet: Arc<dyn FleetService>,
    pub requests: Arc<dyn RequestLifecycleService>,
    pub quotes: Arc<QuoteCoordinator>,
    pub renewals: Arc<BulkRenewalOrchestrator>,
    pub start_time: Instant,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/devices", get(list_devices_handler))
        .route("/api/devices/bulk-renew", post(bulk_renew_handler))
        .route("/api/devices/renewal-plan", post(renewal_plan_handler))
        .route("/api/devices/locate", get(locate_handler))
        .route("/api/devices/{id}", delete(remove_device_handler))
        .route("/api/devices/{id}/grace-token", post(issue_grace_handler))
        .route(
            "/api/requests",
            post(create_request_handler).get(list_requests_handler),
        )
        .route("/api/requests/{id}", get(get_request_handler))
        .route("/api/requests/{id}/approve", post(approve_handler))
        .route("/api/requests/{id}/reject", post(reject_handler))
        .route("/api/requests/{id}/respond", post(respond_handler))
        .route("/api/requests/{id}/quote", get(fetch_quote_handler))
        .route("/api/quotes/preview", post(preview_quote_handler))
        .route(
            "/api/quotes/settings",
            put(update_quote_settings_handler).get(quote_settings_handler),
        )
        .route("/api/stats", get(stats_handler))
        .route("/api/clients", get(clients_handler))
        .with_state(Arc::new(state))
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Renewal(RenewalError),
    Unauthenticated(String),
    BadRequest(String),
}

impl From<RenewalError> for ApiError {
    fn from(err: RenewalError) -> Self {
        ApiError::Renewal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Renewal(err) => {
                let status = match &err {
                    RenewalError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    RenewalError::Authorization(_) => StatusCode::FORBIDDEN,
                    RenewalError::Conflict(_) => StatusCode::CONFLICT,
                    RenewalError::NotFound(_) => StatusCode::NOT_FOUND,
                    RenewalError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
                };
                if status == StatusCode::BAD_GATEWAY {
                    error!("Request failed on external service: {}", err);
                }
                (status, err.kind(), err.to_string())
            }
            ApiError::Unauthenticated(message) => {
                (StatusCode::UNAUTHORIZED, "unauthenticated", message)
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
        };
        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Extractors
// ============================================================================

/// The organization named by the `x-org-id` header
pub struct Actor(pub Organization);

impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORG_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {} header", ORG_HEADER)))?;
        let org_id = OrgId::from_string(raw.trim())
            .map_err(|_| ApiError::Unauthenticated(format!("malformed {} header", ORG_HEADER)))?;
        let org = state
            .organizations
            .find_by_id(org_id)
            .await
            .map_err(RenewalError::from)?
            .ok_or_else(|| RenewalError::NotFound(format!("organization {}", org_id)))?;
        Ok(Actor(org))
    }
}

fn parse_device_id(raw: &str) -> ApiResult<DeviceId> {
    DeviceId::from_string(raw).map_err(|_| ApiError::BadRequest(format!("invalid device id '{}'", raw)))
}

fn parse_request_id(raw: &str) -> ApiResult<RequestId> {
    RequestId::from_string(raw)
        .map_err(|_| ApiError::BadRequest(format!("invalid request id '{}'", raw)))
}

fn parse_client(raw: Option<&str>) -> ApiResult<Option<OrgId>> {
    raw.map(|value| {
        OrgId::from_string(value)
            .map_err(|_| ApiError::BadRequest(format!("invalid client id '{}'", value)))
    })
    .transpose()
}

fn parse_margin(raw: Option<u32>) -> ApiResult<Option<MarginPercent>> {
    Ok(raw
        .map(MarginPercent::new)
        .transpose()
        .map_err(RenewalError::from)?)
}

fn artifact_response(artifact: QuoteArtifact) -> Response {
    let content_type = HeaderValue::from_str(&artifact.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let mut response = (StatusCode::OK, artifact.bytes).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    if let Ok(checksum) = HeaderValue::from_str(&artifact.checksum) {
        response.headers_mut().insert("x-quote-checksum", checksum);
    }
    response
}

// ============================================================================
// Request Bodies & Queries
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocateQuery {
    pub q: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub scope: RequestScope,
}

#[derive(Debug, Deserialize)]
pub struct RenewalPlanRequest {
    #[serde(default)]
    pub device_ids: Vec<DeviceId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RespondRequest {
    #[serde(default)]
    pub margin_percent: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuoteRequest {
    pub client_id: OrgId,
    pub device_ids: Vec<DeviceId>,
    #[serde(default)]
    pub margin_percent: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteSettings {
    pub default_margin_percent: u32,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn list_devices_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Query(query): Query<ClientQuery>,
) -> ApiResult<impl IntoResponse> {
    let client = parse_client(query.client_id.as_deref())?;
    let devices = state.fleet.list_devices(&actor, client).await?;
    Ok(Json(devices))
}

async fn bulk_renew_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(command): Json<BulkRenewalCommand>,
) -> ApiResult<impl IntoResponse> {
    let receipt = state.renewals.renew(&actor, command).await?;
    Ok(Json(receipt))
}

async fn renewal_plan_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(body): Json<RenewalPlanRequest>,
) -> ApiResult<impl IntoResponse> {
    let step = state.fleet.plan_renewal(&actor, &body.device_ids).await?;
    Ok(Json(step))
}

async fn locate_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Query(query): Query<LocateQuery>,
) -> ApiResult<impl IntoResponse> {
    let coordinates = state.fleet.locate(&actor, &query.q).await?;
    Ok(Json(coordinates))
}

async fn issue_grace_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let device_id = parse_device_id(&id)?;
    let device = state.fleet.issue_grace(&actor, device_id).await?;
    Ok(Json(device))
}

async fn remove_device_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let device_id = parse_device_id(&id)?;
    state.fleet.remove_device(&actor, device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_request_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(command): Json<CreateRequestCommand>,
) -> ApiResult<impl IntoResponse> {
    let request = state.requests.create(&actor, command).await?;
    debug!(request_id = %request.id, "Created request over HTTP");
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    let requests = state.requests.list(&actor, query.scope).await?;
    Ok(Json(requests))
}

async fn get_request_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let request_id = parse_request_id(&id)?;
    let request = state.requests.get(request_id, &actor).await?;
    Ok(Json(request))
}

async fn approve_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let request_id = parse_request_id(&id)?;
    let request = state.requests.approve(request_id, &actor).await?;
    Ok(Json(request))
}

async fn reject_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(body): Json<RejectRequest>,
) -> ApiResult<impl IntoResponse> {
    let request_id = parse_request_id(&id)?;
    let request = state
        .requests
        .reject(request_id, &actor, body.message)
        .await?;
    Ok(Json(request))
}

async fn respond_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(body): Json<RespondRequest>,
) -> ApiResult<impl IntoResponse> {
    let request_id = parse_request_id(&id)?;
    let margin = parse_margin(body.margin_percent)?;
    let request = state
        .quotes
        .send(&actor, request_id, margin, body.message)
        .await?;
    Ok(Json(request))
}

async fn fetch_quote_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let request_id = parse_request_id(&id)?;
    let artifact = state.requests.fetch_quote(request_id, &actor).await?;
    Ok(artifact_response(artifact))
}

async fn preview_quote_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(body): Json<PreviewQuoteRequest>,
) -> ApiResult<Response> {
    let margin = parse_margin(body.margin_percent)?;
    let artifact = state
        .quotes
        .preview(&actor, body.client_id, &body.device_ids, margin)
        .await?;
    Ok(artifact_response(artifact))
}

async fn quote_settings_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
) -> ApiResult<Json<QuoteSettings>> {
    let margin = state.quotes.default_margin(actor.id)?;
    Ok(Json(QuoteSettings {
        default_margin_percent: margin.value(),
    }))
}

async fn update_quote_settings_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(body): Json<QuoteSettings>,
) -> ApiResult<Json<QuoteSettings>> {
    let margin = MarginPercent::new(body.default_margin_percent).map_err(RenewalError::from)?;
    state.quotes.set_default_margin(&actor, margin)?;
    Ok(Json(QuoteSettings {
        default_margin_percent: margin.value(),
    }))
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Query(query): Query<ClientQuery>,
) -> ApiResult<impl IntoResponse> {
    let client = parse_client(query.client_id.as_deref())?;
    let stats = state.fleet.fleet_stats(&actor, client).await?;
    Ok(Json(stats))
}

async fn clients_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
) -> ApiResult<impl IntoResponse> {
    let clients = state.fleet.client_stats(&actor).await?;
    Ok(Json(clients))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let cases = [
            (RenewalError::Validation("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (RenewalError::Authorization("x".into()), StatusCode::FORBIDDEN),
            (RenewalError::Conflict("x".into()), StatusCode::CONFLICT),
            (RenewalError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                RenewalError::ExternalService {
                    service: "payment gateway".into(),
                    message: "timeout".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            let kind = err.kind();
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
            let body = body_json(response).await;
            assert_eq!(body["error"], kind);
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_is_401() {
        let response = ApiError::Unauthenticated("missing x-org-id header".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unauthenticated");
    }

    #[test]
    fn test_client_query_parsing() {
        assert_eq!(parse_client(None).unwrap(), None);
        assert!(parse_client(Some("not-a-uuid")).is_err());
        let id = OrgId::new();
        assert_eq!(parse_client(Some(&id.to_string())).unwrap(), Some(id));
    }
}
