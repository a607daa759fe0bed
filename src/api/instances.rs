/// Workflow instance REST API endpoints
///
/// The acting user comes from the `x-user-id` header.

use crate::{
    api::{reject, user_id, AppState},
    workflow::types::{
        CompleteStepRequest, InstanceFilter, StartWorkflowRequest, WorkflowInstanceView,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Optional reason for cancel/suspend, passed as `?reason=`
#[derive(Debug, Default, Deserialize)]
pub struct ReasonQuery {
    pub reason: Option<String>,
}

pub fn create_instance_routes() -> Router<AppState> {
    Router::new()
        .route("/api/instances", get(list_instances).post(start_instance))
        .route("/api/instances/{id}", get(get_instance))
        .route("/api/instances/{id}/steps/{step_id}/complete", post(complete_step))
        .route("/api/instances/{id}/cancel", post(cancel_instance))
        .route("/api/instances/{id}/suspend", post(suspend_instance))
        .route("/api/instances/{id}/resume", post(resume_instance))
        .route("/api/instances/{id}/audit", get(audit_log))
        .route("/api/instances/{id}/actions", get(available_actions))
        .route("/api/tasks", get(user_tasks))
}

/// GET /api/instances?workflow_id=...&status=Running
async fn list_instances(
    State(state): State<AppState>,
    Query(filter): Query<InstanceFilter>,
) -> Result<Json<Value>, StatusCode> {
    let instances = state
        .instances
        .list_instances(&filter)
        .await
        .map_err(|e| reject("Failed to list instances", e))?;

    Ok(Json(json!({ "instances": instances })))
}

/// POST /api/instances
/// Body: { "workflow_id": "...", "instance_data": {...}, "tenant_id": "tenant-a" }
async fn start_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartWorkflowRequest>,
) -> Result<Json<WorkflowInstanceView>, StatusCode> {
    state
        .instances
        .start_workflow(request, &user_id(&headers))
        .await
        .map(Json)
        .map_err(|e| reject("Failed to start workflow", e))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowInstanceView>, StatusCode> {
    match state.instances.get_instance(id).await {
        Ok(Some(view)) => Ok(Json(view)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(reject("Failed to get instance", e)),
    }
}

/// POST /api/instances/{id}/steps/{step_id}/complete
/// Body: { "approved": true, "comments": "...", "step_data": {...} }
async fn complete_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
    Json(request): Json<CompleteStepRequest>,
) -> Result<Json<WorkflowInstanceView>, StatusCode> {
    state
        .instances
        .complete_step(id, &step_id, request, &user_id(&headers))
        .await
        .map(Json)
        .map_err(|e| reject("Failed to complete step", e))
}

async fn cancel_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReasonQuery>,
    headers: HeaderMap,
) -> Result<Json<WorkflowInstanceView>, StatusCode> {
    state
        .instances
        .cancel_workflow(id, &user_id(&headers), query.reason)
        .await
        .map(Json)
        .map_err(|e| reject("Failed to cancel instance", e))
}

async fn suspend_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReasonQuery>,
    headers: HeaderMap,
) -> Result<Json<WorkflowInstanceView>, StatusCode> {
    state
        .instances
        .suspend_workflow(id, &user_id(&headers), query.reason)
        .await
        .map(Json)
        .map_err(|e| reject("Failed to suspend instance", e))
}

async fn resume_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<WorkflowInstanceView>, StatusCode> {
    state
        .instances
        .resume_workflow(id, &user_id(&headers))
        .await
        .map(Json)
        .map_err(|e| reject("Failed to resume instance", e))
}

/// GET /api/instances/{id}/audit (newest first)
async fn audit_log(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let entries = state
        .instances
        .get_audit_log(id)
        .await
        .map_err(|e| reject("Failed to read audit log", e))?;

    Ok(Json(json!({ "entries": entries })))
}

async fn available_actions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let actions = state
        .instances
        .engine()
        .get_available_actions(id, &user_id(&headers))
        .await
        .map_err(|e| reject("Failed to compute available actions", e))?;

    Ok(Json(json!({ "actions": actions })))
}

/// GET /api/tasks: instances waiting on the calling user
async fn user_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let tasks = state
        .instances
        .get_user_tasks(&user_id(&headers))
        .await
        .map_err(|e| reject("Failed to list user tasks", e))?;

    Ok(Json(json!({ "tasks": tasks })))
}
