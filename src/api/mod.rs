/// HTTP API Layer
///
/// Thin REST surface over the service boundary. It handles:
/// - Workflow definition management
/// - Instance lifecycle, audit log and user task queries
/// - Tenant form dispatch and plugin administration

use crate::{
    error::WorkflowError,
    forms::FormEngine,
    plugin::PluginLoader,
    runtime::InstanceService,
    workflow::WorkflowService,
};
use axum::{
    http::{HeaderMap, StatusCode},
    Router,
};
use std::sync::Arc;

// Workflow definition endpoints
pub mod workflows;

// Instance lifecycle endpoints
pub mod instances;

// Tenant form and plugin endpoints
pub mod tenants;

// Re-export router builders
pub use instances::create_instance_routes;
pub use tenants::create_tenant_routes;
pub use workflows::create_workflow_routes;

/// Header carrying the caller's identity
pub const USER_HEADER: &str = "x-user-id";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub workflows: WorkflowService,
    pub instances: InstanceService,
    pub forms: FormEngine,
    pub plugins: Arc<PluginLoader>,
}

/// All API routes
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(create_workflow_routes())
        .merge(create_instance_routes())
        .merge(create_tenant_routes())
}

/// Caller identity from `x-user-id`, `anonymous` when absent
pub fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

pub fn status_for(error: &WorkflowError) -> StatusCode {
    match error {
        WorkflowError::WorkflowNotFound(_)
        | WorkflowError::InstanceNotFound(_)
        | WorkflowError::StepNotFound { .. } => StatusCode::NOT_FOUND,
        WorkflowError::WorkflowInactive(_)
        | WorkflowError::InvalidStepState { .. }
        | WorkflowError::InvalidInstanceState { .. }
        | WorkflowError::ActiveInstances(_) => StatusCode::CONFLICT,
        WorkflowError::MalformedDefinition(_) | WorkflowError::InvalidDefinition(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Log a service error and turn it into a response status
pub(crate) fn reject(context: &str, error: WorkflowError) -> StatusCode {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!("❌ {}: {}", context, error);
    } else {
        tracing::warn!("⚠️ {}: {}", context, error);
    }
    status
}
