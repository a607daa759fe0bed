/// Tenant-scoped REST API endpoints
///
/// Form dispatch through the tenant's plugins, plugin listing and reload.
/// These never fail on plugin faults; the form engine degrades to defaults.

use crate::{
    api::{user_id, AppState},
    config::ConfigMap,
    forms::FormData,
    plugin::contracts::{FormConfiguration, FormProcessingResult, ValidationResult},
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

/// Form as posted by a client; tenant and user come from the route and headers
#[derive(Debug, Deserialize)]
pub struct FormSubmission {
    pub form_type: String,
    #[serde(default)]
    pub form_id: Option<String>,
    #[serde(default)]
    pub fields: ConfigMap,
}

impl FormSubmission {
    fn into_form(self, tenant_id: &str, user_id: String) -> FormData {
        let mut form = FormData::new(tenant_id, &self.form_type, self.fields);
        if let Some(form_id) = self.form_id {
            form.form_id = form_id;
        }
        form.user_id = user_id;
        form
    }
}

pub fn create_tenant_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tenants/{tenant}/forms/validate", post(validate_form))
        .route("/api/tenants/{tenant}/forms/submit", post(submit_form))
        .route("/api/tenants/{tenant}/forms/transform", post(transform_form))
        .route(
            "/api/tenants/{tenant}/forms/{form_type}/configuration",
            get(form_configuration),
        )
        .route("/api/tenants/{tenant}/forms/{form_type}/rules", get(validation_rules))
        .route("/api/tenants/{tenant}/plugins", get(list_plugins))
        .route("/api/tenants/{tenant}/plugins/reload", post(reload_plugins))
        .route(
            "/api/tenants/{tenant}/workflow-steps/{workflow_type}",
            get(workflow_steps),
        )
}

async fn validate_form(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Json(submission): Json<FormSubmission>,
) -> Json<ValidationResult> {
    let form = submission.into_form(&tenant, user_id(&headers));
    Json(state.forms.validate_form(&form).await)
}

/// POST /api/tenants/{tenant}/forms/submit
/// Body: { "form_type": "registration", "fields": {...} }
async fn submit_form(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Json(submission): Json<FormSubmission>,
) -> Json<FormProcessingResult> {
    let mut form = submission.into_form(&tenant, user_id(&headers));
    form.submitted_at = Some(Utc::now());
    form.status = "Submitted".to_string();

    Json(state.forms.submit_form(&form).await)
}

async fn transform_form(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Json(submission): Json<FormSubmission>,
) -> Json<Value> {
    let form = submission.into_form(&tenant, user_id(&headers));
    Json(state.forms.transform_form_data(&form).await)
}

async fn form_configuration(
    State(state): State<AppState>,
    Path((tenant, form_type)): Path<(String, String)>,
) -> Json<FormConfiguration> {
    Json(state.forms.get_form_configuration(&tenant, &form_type).await)
}

async fn validation_rules(
    State(state): State<AppState>,
    Path((tenant, form_type)): Path<(String, String)>,
) -> Json<Value> {
    let rules = state.forms.get_validation_rules(&tenant, &form_type).await;
    Json(json!({ "rules": rules }))
}

/// GET /api/tenants/{tenant}/plugins
async fn list_plugins(State(state): State<AppState>, Path(tenant): Path<String>) -> Json<Value> {
    let plugins = state.plugins.plugin_summaries(&tenant).await;
    Json(json!({ "tenant_id": tenant, "plugins": plugins }))
}

/// POST /api/tenants/{tenant}/plugins/reload
async fn reload_plugins(State(state): State<AppState>, Path(tenant): Path<String>) -> Json<Value> {
    state.plugins.reload_tenant_plugins(&tenant).await;
    Json(json!({ "message": format!("Plugins reloaded for tenant {}", tenant) }))
}

async fn workflow_steps(
    State(state): State<AppState>,
    Path((tenant, workflow_type)): Path<(String, String)>,
) -> Json<Value> {
    let steps = state
        .instances
        .engine()
        .get_workflow_steps(&tenant, &workflow_type)
        .await;
    Json(json!({ "steps": steps }))
}
