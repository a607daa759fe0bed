#![allow(dead_code)]

use serde_json::{json, Value};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tenantflow::{
    config::{ConfigMap, PluginConfig},
    plugin::PluginLoader,
    runtime::{InstanceService, WorkflowEngine},
    workflow::{
        registry::DefinitionRegistry, storage::WorkflowStorage, types::CreateWorkflowRequest,
        WorkflowService,
    },
};
use uuid::Uuid;

/// The plugin tree shipped with the repository
pub fn sample_plugins_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("plugins")
}

pub fn write_unit(root: &Path, tenant: &str, file: &str, source: &str) {
    let dir = root.join(tenant);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), source).unwrap();
}

/// A validator unit whose plugin reports `tenant_id` back through its errors
pub fn validator_unit(tenant_id: &str, name: &str) -> String {
    format!(
        r#"
        register("validator", function()
            return {{
                tenant_id = "{tenant_id}",
                name = "{name}",
                version = "1.0.0",
                validate = function(self, data, ctx)
                    return {{ is_valid = false, errors = {{ {{ field = "owner", code = self.tenant_id, message = self.name }} }} }}
                end,
            }}
        end)
        "#
    )
}

pub fn loader(root: &Path) -> PluginLoader {
    PluginLoader::new(PluginConfig::new(root.display().to_string()))
}

pub fn fields(value: Value) -> ConfigMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

pub struct Harness {
    pub storage: WorkflowStorage,
    pub workflows: WorkflowService,
    pub instances: InstanceService,
    pub engine: Arc<WorkflowEngine>,
    pub loader: Arc<PluginLoader>,
}

impl Harness {
    pub async fn new(plugins_root: &Path) -> Self {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let registry = Arc::new(DefinitionRegistry::new());
        let loader = Arc::new(loader(plugins_root));
        let engine = Arc::new(WorkflowEngine::new(
            storage.clone(),
            Arc::clone(&registry),
            Arc::clone(&loader),
        ));

        Self {
            workflows: WorkflowService::new(storage.clone(), registry),
            instances: InstanceService::new(storage.clone(), Arc::clone(&engine)),
            storage,
            engine,
            loader,
        }
    }

    /// Create and activate a workflow from definition JSON
    pub async fn active_workflow(&self, definition: Value) -> Uuid {
        let request = CreateWorkflowRequest {
            name: definition["name"].as_str().unwrap_or("Test").to_string(),
            description: String::new(),
            definition: definition.to_string(),
        };
        let record = self.workflows.create_workflow(request, "admin").await.unwrap();
        assert!(self.workflows.activate_workflow(record.id).await.unwrap());
        record.id
    }
}

/// start (alice) -> review (role manager)
pub fn two_step_definition() -> Value {
    json!({
        "name": "Leave request",
        "startStepId": "start",
        "steps": [
            { "id": "start", "name": "Submit", "type": "manual", "assignedUser": "alice" },
            { "id": "review", "name": "Manager review", "type": "approval", "assignedRole": "manager" }
        ],
        "transitions": [{ "fromStepId": "start", "toStepId": "review", "action": "approve" }]
    })
}

/// A single approval step with no outgoing transitions
pub fn single_step_definition() -> Value {
    json!({
        "name": "Sign-off",
        "startStepId": "a",
        "steps": [{ "id": "a", "name": "Approve", "type": "approval", "assignedUser": "alice" }],
        "transitions": []
    })
}

/// Automatic policy check, manager review, then finance review or straight to payout
pub fn expense_definition() -> Value {
    json!({
        "name": "Expense claim",
        "startStepId": "policy-check",
        "steps": [
            { "id": "policy-check", "name": "Policy check", "type": "automatic" },
            { "id": "manager-review", "name": "Manager review", "type": "approval", "assignedRole": "manager" },
            { "id": "finance-review", "name": "Finance review", "type": "approval", "assignedRole": "finance" },
            { "id": "payout", "name": "Payout", "type": "manual", "assignedUser": "payroll" }
        ],
        "transitions": [
            { "fromStepId": "policy-check", "toStepId": "manager-review" },
            { "fromStepId": "manager-review", "toStepId": "finance-review" },
            { "fromStepId": "manager-review", "toStepId": "payout" },
            { "fromStepId": "finance-review", "toStepId": "payout" }
        ]
    })
}
