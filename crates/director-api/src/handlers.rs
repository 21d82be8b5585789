//! REST API handlers.
//!
//! Each handler resolves the calling tenant from request headers, forwards
//! to the [`Director`](director_formation::Director) and returns a JSON
//! envelope. `StateError` variants map onto HTTP status codes in one place.

use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use director_core::{ConsumerType, LabelValue, ResourceType};
use director_formation::PageRequest;
use director_state::*;

use crate::ApiState;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const CONSUMER_TYPE_HEADER: &str = "x-consumer-type";

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(err: &StateError) -> StatusCode {
    match err {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_) | StateError::Conflict(_) => StatusCode::CONFLICT,
        StateError::Forbidden(_) => StatusCode::FORBIDDEN,
        StateError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: StateResult<T>) -> Response {
    respond_with(StatusCode::OK, result)
}

fn respond_with<T: Serialize>(status: StatusCode, result: StateResult<T>) -> Response {
    match result {
        Ok(data) => (status, ApiResponse::ok(data)).into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(error = %e, "request failed");
            } else {
                debug!(error = %e, %status, "request rejected");
            }
            error_response(&e.to_string(), status)
        }
    }
}

// ── Caller ─────────────────────────────────────────────────────

/// Tenant and consumer kind of the caller, taken from request headers.
#[derive(Debug, Clone)]
pub struct Caller {
    pub tenant: String,
    pub consumer: ConsumerType,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                error_response(
                    &format!("missing {TENANT_HEADER} header"),
                    StatusCode::BAD_REQUEST,
                )
            })?;

        let consumer = match parts.headers.get(CONSUMER_TYPE_HEADER) {
            None => ConsumerType::default(),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(ConsumerType::parse)
                .ok_or_else(|| {
                    error_response(
                        &format!("invalid {CONSUMER_TYPE_HEADER} header"),
                        StatusCode::BAD_REQUEST,
                    )
                })?,
        };

        Ok(Self {
            tenant: tenant.to_string(),
            consumer,
        })
    }
}

// ── Request bodies ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SetLabelRequest {
    pub value: LabelValue,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub source_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFormationRequest {
    pub name: String,
    #[serde(default)]
    pub template_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentRequest {
    pub object_type: ResourceType,
    pub object_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MembersQuery {
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    /// Publish to every tenant instead of only the caller's.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub runtime_types: Vec<String>,
    #[serde(default)]
    pub application_types: Vec<String>,
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Applications ───────────────────────────────────────────────

/// GET /api/v1/applications?first&after
pub async fn list_applications(
    State(state): State<ApiState>,
    caller: Caller,
    Query(page): Query<PageRequest>,
) -> Response {
    respond(state.director.applications(&caller.tenant, &page))
}

/// POST /api/v1/applications
pub async fn register_application(
    State(state): State<ApiState>,
    caller: Caller,
    Json(input): Json<ApplicationRegisterInput>,
) -> Response {
    respond_with(
        StatusCode::CREATED,
        state.director.register_application(&caller.tenant, &input),
    )
}

/// GET /api/v1/applications/{id}
pub async fn get_application(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Response {
    respond(state.director.application(&caller.tenant, &id))
}

/// PUT /api/v1/applications/{id}
pub async fn update_application(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(input): Json<ApplicationUpdateInput>,
) -> Response {
    respond(
        state
            .director
            .update_application(&caller.tenant, &id, &input, caller.consumer),
    )
}

/// DELETE /api/v1/applications/{id}
pub async fn unregister_application(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Response {
    respond(state.director.unregister_application(&caller.tenant, &id))
}

/// POST /api/v1/applications/{id}/unpair
pub async fn unpair_application(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Response {
    respond(state.director.unpair_application(&caller.tenant, &id))
}

/// POST /api/v1/applications/{id}/merge
pub async fn merge_applications(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<MergeRequest>,
) -> Response {
    respond(
        state
            .director
            .merge_applications(&caller.tenant, &id, &req.source_id),
    )
}

/// PUT /api/v1/applications/{id}/labels/{key}
pub async fn set_application_label(
    State(state): State<ApiState>,
    caller: Caller,
    Path((id, key)): Path<(String, String)>,
    Json(req): Json<SetLabelRequest>,
) -> Response {
    respond(
        state
            .director
            .set_application_label(&caller.tenant, &id, &key, &req.value),
    )
}

/// DELETE /api/v1/applications/{id}/labels/{key}
pub async fn delete_application_label(
    State(state): State<ApiState>,
    caller: Caller,
    Path((id, key)): Path<(String, String)>,
) -> Response {
    respond(
        state
            .director
            .delete_application_label(&caller.tenant, &id, &key),
    )
}

// ── Runtimes ───────────────────────────────────────────────────

/// GET /api/v1/runtimes
pub async fn list_runtimes(State(state): State<ApiState>, caller: Caller) -> Response {
    respond(state.director.runtimes(&caller.tenant))
}

/// POST /api/v1/runtimes
pub async fn register_runtime(
    State(state): State<ApiState>,
    caller: Caller,
    Json(input): Json<RuntimeRegisterInput>,
) -> Response {
    respond_with(
        StatusCode::CREATED,
        state.director.register_runtime(&caller.tenant, &input),
    )
}

/// GET /api/v1/runtimes/{id}
pub async fn get_runtime(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Response {
    respond(state.director.runtime(&caller.tenant, &id))
}

/// DELETE /api/v1/runtimes/{id}
pub async fn unregister_runtime(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Response {
    respond(state.director.unregister_runtime(&caller.tenant, &id))
}

/// PUT /api/v1/runtimes/{id}/labels/{key}
pub async fn set_runtime_label(
    State(state): State<ApiState>,
    caller: Caller,
    Path((id, key)): Path<(String, String)>,
    Json(req): Json<SetLabelRequest>,
) -> Response {
    respond(
        state
            .director
            .set_runtime_label(&caller.tenant, &id, &key, &req.value),
    )
}

/// DELETE /api/v1/runtimes/{id}/labels/{key}
pub async fn delete_runtime_label(
    State(state): State<ApiState>,
    caller: Caller,
    Path((id, key)): Path<(String, String)>,
) -> Response {
    respond(state.director.delete_runtime_label(&caller.tenant, &id, &key))
}

/// GET /api/v1/runtimes/{id}/applications?first&after
pub async fn applications_for_runtime(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Query(page): Query<PageRequest>,
) -> Response {
    respond(
        state
            .director
            .applications_for_runtime(&caller.tenant, &id, &page),
    )
}

// ── Formations ─────────────────────────────────────────────────

/// GET /api/v1/formations
pub async fn list_formations(State(state): State<ApiState>, caller: Caller) -> Response {
    respond(state.director.formations(&caller.tenant))
}

/// POST /api/v1/formations
pub async fn create_formation(
    State(state): State<ApiState>,
    caller: Caller,
    Json(req): Json<CreateFormationRequest>,
) -> Response {
    respond_with(
        StatusCode::CREATED,
        state
            .director
            .create_formation(&caller.tenant, &req.name, req.template_name.as_deref()),
    )
}

/// GET /api/v1/formations/{name}
pub async fn get_formation(
    State(state): State<ApiState>,
    caller: Caller,
    Path(name): Path<String>,
) -> Response {
    respond(state.director.formation(&caller.tenant, &name))
}

/// DELETE /api/v1/formations/{name}
pub async fn delete_formation(
    State(state): State<ApiState>,
    caller: Caller,
    Path(name): Path<String>,
) -> Response {
    respond(state.director.delete_formation(&caller.tenant, &name))
}

/// POST /api/v1/formations/{name}/assign
pub async fn assign_formation(
    State(state): State<ApiState>,
    caller: Caller,
    Path(name): Path<String>,
    Json(req): Json<AssignmentRequest>,
) -> Response {
    respond(state.director.assign_formation(
        &caller.tenant,
        &name,
        req.object_type,
        &req.object_id,
    ))
}

/// POST /api/v1/formations/{name}/unassign
pub async fn unassign_formation(
    State(state): State<ApiState>,
    caller: Caller,
    Path(name): Path<String>,
    Json(req): Json<AssignmentRequest>,
) -> Response {
    respond(state.director.unassign_formation(
        &caller.tenant,
        &name,
        req.object_type,
        &req.object_id,
    ))
}

/// GET /api/v1/formations/{name}/members?type=
pub async fn formation_members(
    State(state): State<ApiState>,
    caller: Caller,
    Path(name): Path<String>,
    Query(query): Query<MembersQuery>,
) -> Response {
    let resource_type = match query.resource_type.as_deref() {
        None => None,
        Some(raw) => match ResourceType::parse(raw) {
            Some(rt) => Some(rt),
            None => {
                return error_response(
                    &format!("unknown resource type {raw}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        },
    };
    respond(
        state
            .director
            .formation_members(&caller.tenant, &name, resource_type),
    )
}

// ── Formation templates ────────────────────────────────────────

/// GET /api/v1/formation-templates
pub async fn list_formation_templates(State(state): State<ApiState>, caller: Caller) -> Response {
    respond(state.director.formation_templates(&caller.tenant))
}

/// POST /api/v1/formation-templates
pub async fn put_formation_template(
    State(state): State<ApiState>,
    caller: Caller,
    Json(req): Json<TemplateRequest>,
) -> Response {
    let template = FormationTemplate {
        name: req.name,
        tenant: (!req.global).then(|| caller.tenant.clone()),
        runtime_types: req.runtime_types,
        application_types: req.application_types,
        owner: None,
    };
    respond_with(
        StatusCode::CREATED,
        state.director.put_formation_template(&caller.tenant, &template),
    )
}
