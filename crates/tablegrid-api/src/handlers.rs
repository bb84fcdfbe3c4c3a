//! REST API handlers.
//!
//! Pipeline handlers go through `PipelineControl` for transitions and the
//! `PipelineStore` for plain reads. Every response uses the `ApiResponse`
//! envelope.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::warn;

use tablegrid_flows::FlowErrorNotification;
use tablegrid_lifecycle::LifecycleError;
use tablegrid_reconcile::{DisableOutcome, ReconcileError};
use tablegrid_state::{NewPipeline, PipelineStatus, StateError, ValidationIssue};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<Vec<ValidationIssue>>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            issues: None,
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
            issues: None,
        }),
    )
        .into_response()
}

fn validation_response(msg: &str, issues: Vec<ValidationIssue>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            issues: Some(issues),
        }),
    )
        .into_response()
}

fn state_status(err: &StateError) -> StatusCode {
    match err {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::Conflict(_) | StateError::IllegalTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reconcile_status(err: &ReconcileError) -> StatusCode {
    match err {
        ReconcileError::Lifecycle(LifecycleError::NotFound(_)) => StatusCode::NOT_FOUND,
        ReconcileError::Lifecycle(
            LifecycleError::Conflict(_) | LifecycleError::IllegalTransition { .. },
        ) => StatusCode::CONFLICT,
        ReconcileError::Lifecycle(LifecycleError::State(e)) | ReconcileError::State(e) => {
            state_status(e)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reconcile_error(err: &ReconcileError) -> Response {
    let status = reconcile_status(err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    error_response(&err.to_string(), status)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        validation_response(
            "request body is not valid JSON",
            vec![ValidationIssue {
                path: String::new(),
                message: e.to_string(),
            }],
        )
    })
}

// ── Pipelines ──────────────────────────────────────────────────

/// POST /api/v1/pipeline
pub async fn create_pipeline(State(state): State<ApiState>, body: Bytes) -> Response {
    let doc: Value = match parse_body(&body) {
        Ok(doc) => doc,
        Err(resp) => return resp,
    };
    let new = match NewPipeline::from_json(&doc) {
        Ok(new) => new,
        Err(e) => return validation_response("invalid pipeline document", e.issues),
    };
    match state.store.insert_pipeline(new) {
        Ok(pipeline) => {
            (StatusCode::CREATED, ApiResponse::ok(json!({"id": pipeline.id}))).into_response()
        }
        Err(e) => error_response(&e.to_string(), state_status(&e)),
    }
}

#[derive(serde::Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/v1/pipeline
pub async fn list_pipelines(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let status = match query.status.as_deref().map(str::parse::<PipelineStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(msg)) => {
            return validation_response(
                "invalid status filter",
                vec![ValidationIssue {
                    path: "status".to_string(),
                    message: msg,
                }],
            );
        }
    };
    match state.store.list_pipelines(status) {
        Ok(pipelines) => ApiResponse::ok(json!({"pipelines": pipelines})).into_response(),
        Err(e) => error_response(&e.to_string(), state_status(&e)),
    }
}

/// GET /api/v1/pipeline/{id}
pub async fn get_pipeline(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get_pipeline(&id) {
        Ok(Some(pipeline)) => ApiResponse::ok(pipeline).into_response(),
        Ok(None) => error_response(&format!("pipeline {id} not found"), StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), state_status(&e)),
    }
}

/// DELETE /api/v1/pipeline/{id}
pub async fn delete_pipeline(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.delete_pipeline(&id) {
        Ok(pipeline) => ApiResponse::ok(json!({"id": pipeline.id})).into_response(),
        Err(e) => error_response(&e.to_string(), state_status(&e)),
    }
}

/// POST /api/v1/pipeline/{id}/enable
pub async fn enable_pipeline(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.control.enable(&id).await {
        Ok((activation, announcement)) => ApiResponse::ok(json!({
            "id": id,
            "status": activation.change.after.status,
            "superseded": activation.superseded,
            "announcement": announcement,
        }))
        .into_response(),
        Err(e) => reconcile_error(&e),
    }
}

/// POST /api/v1/pipeline/{id}/disable
pub async fn disable_pipeline(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.control.disable(&id).await {
        Ok(DisableOutcome::Disabling {
            before,
            announcement,
        }) => ApiResponse::ok(json!({
            "id": id,
            "status": PipelineStatus::Disabling,
            "previous_status": before.status,
            "announcement": announcement,
        }))
        .into_response(),
        Ok(DisableOutcome::AlreadyDisabled(pipeline)) => ApiResponse::ok(json!({
            "id": id,
            "status": pipeline.status,
        }))
        .into_response(),
        Ok(DisableOutcome::OtherActive { active_id }) => ApiResponse::ok(json!({
            "id": id,
            "status": PipelineStatus::Disabled,
            "active_id": active_id,
        }))
        .into_response(),
        Err(e) => reconcile_error(&e),
    }
}

// ── Layout & owners ────────────────────────────────────────────

/// GET /api/v1/layout
pub async fn current_layout(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.publisher.latest()).into_response()
}

/// GET /api/v1/owners
pub async fn list_owners(State(state): State<ApiState>) -> Response {
    let owners = state.control.coordinator().registry().list().await;
    ApiResponse::ok(json!({"owners": owners})).into_response()
}

/// PUT /api/v1/owners/{owner}
pub async fn register_owner(State(state): State<ApiState>, Path(owner): Path<String>) -> Response {
    let added = state.control.coordinator().registry().register(&owner).await;
    ApiResponse::ok(json!({"owner": owner, "added": added})).into_response()
}

/// DELETE /api/v1/owners/{owner}
pub async fn unregister_owner(
    State(state): State<ApiState>,
    Path(owner): Path<String>,
) -> Response {
    let removed = state.control.coordinator().registry().unregister(&owner).await;
    ApiResponse::ok(json!({"owner": owner, "removed": removed})).into_response()
}

/// POST /api/v1/owners/{owner}/ack
pub async fn acknowledge_layout(
    State(state): State<ApiState>,
    Path(owner): Path<String>,
) -> Response {
    let outcome = state.control.coordinator().acknowledge(&owner).await;
    ApiResponse::ok(outcome).into_response()
}

// ── Flow notifications ─────────────────────────────────────────

/// POST /api/v1/flow_errors
pub async fn flow_error(State(state): State<ApiState>, body: Bytes) -> Response {
    let notification: FlowErrorNotification = match parse_body(&body) {
        Ok(n) => n,
        Err(resp) => return resp,
    };
    match state.engine.handle_flow_error(&notification) {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => reconcile_error(&e),
    }
}
