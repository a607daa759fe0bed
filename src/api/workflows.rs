/// Workflow definition REST API endpoints
///
/// CRUD over versioned definitions. Creating or updating stores an inactive
/// version; activation is a separate call.

use crate::{
    api::{reject, user_id, AppState},
    workflow::types::{CreateWorkflowRequest, WorkflowRecord},
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

#[derive(Debug, Default, Deserialize)]
pub struct ListWorkflowsQuery {
    /// Include inactive definitions
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Deserialize)]
pub struct ValidateDefinitionRequest {
    pub definition: String,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route("/api/workflows/validate", post(validate_definition))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/activate", post(activate_workflow))
        .route("/api/workflows/{id}/deactivate", post(deactivate_workflow))
}

/// GET /api/workflows?all=true
async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<Value>, StatusCode> {
    let workflows = if query.all {
        state.workflows.list_workflows().await
    } else {
        state.workflows.list_active_workflows().await
    }
    .map_err(|e| reject("Failed to list workflows", e))?;

    Ok(Json(json!({ "workflows": workflows })))
}

/// POST /api/workflows
/// Body: { "name": "...", "description": "...", "definition": "<definition JSON text>" }
async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    if request.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .workflows
        .create_workflow(request, &user_id(&headers))
        .await
        .map(Json)
        .map_err(|e| reject("Failed to create workflow", e))
}

/// POST /api/workflows/validate
async fn validate_definition(
    State(state): State<AppState>,
    Json(request): Json<ValidateDefinitionRequest>,
) -> Json<Value> {
    let valid = state.workflows.validate_definition_text(&request.definition);
    Json(json!({ "valid": valid }))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    match state.workflows.get_workflow(id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(reject("Failed to get workflow", e)),
    }
}

/// PUT /api/workflows/{id}
///
/// Returns the new version; `{id}` is deactivated.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    if request.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .workflows
        .update_workflow(id, request, &user_id(&headers))
        .await
        .map(Json)
        .map_err(|e| reject("Failed to update workflow", e))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    match state.workflows.delete_workflow(id).await {
        Ok(true) => Ok(Json(json!({ "message": "Workflow deleted successfully" }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(reject("Failed to delete workflow", e)),
    }
}

async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    match state.workflows.activate_workflow(id).await {
        Ok(true) => Ok(Json(json!({ "id": id, "is_active": true }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(reject("Failed to activate workflow", e)),
    }
}

async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    match state.workflows.deactivate_workflow(id).await {
        Ok(true) => Ok(Json(json!({ "id": id, "is_active": false }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(reject("Failed to deactivate workflow", e)),
    }
}
