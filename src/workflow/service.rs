/// Workflow definition service
///
/// Versioned CRUD over stored definitions. Definitions are never edited in
/// place: an update stores a new record at `version + 1` and deactivates the
/// previous one in the same transaction.

use crate::{
    error::WorkflowError,
    workflow::{
        definition::{check_definition, parse_definition, validate_definition, CompiledDefinition},
        registry::DefinitionRegistry,
        storage::{self, WorkflowStorage},
        types::{CreateWorkflowRequest, WorkflowRecord},
    },
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkflowService {
    storage: WorkflowStorage,
    registry: Arc<DefinitionRegistry>,
}

impl WorkflowService {
    pub fn new(storage: WorkflowStorage, registry: Arc<DefinitionRegistry>) -> Self {
        Self { storage, registry }
    }

    /// Store a new definition, inactive at version 1
    pub async fn create_workflow(
        &self,
        request: CreateWorkflowRequest,
        created_by: &str,
    ) -> Result<WorkflowRecord, WorkflowError> {
        let compiled = Self::certify(&request.definition)?;

        let record = WorkflowRecord {
            id: Uuid::new_v4(),
            name: request.name,
            description: request.description,
            definition: request.definition,
            version: 1,
            is_active: false,
            created_at: Utc::now(),
            updated_at: None,
            created_by: created_by.to_string(),
        };

        let mut tx = self.storage.begin().await?;
        storage::insert_workflow(&mut tx, &record).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        self.registry.insert(record.id, Arc::new(compiled));
        tracing::info!("✅ Created workflow '{}' ({}) by {}", record.name, record.id, created_by);

        Ok(record)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRecord>, WorkflowError> {
        Ok(self.storage.get_workflow(id).await?)
    }

    pub async fn list_active_workflows(&self) -> Result<Vec<WorkflowRecord>, WorkflowError> {
        Ok(self.storage.list_workflows(true).await?)
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, WorkflowError> {
        Ok(self.storage.list_workflows(false).await?)
    }

    /// Store `request` as the next version of `id` and retire `id`
    pub async fn update_workflow(
        &self,
        id: Uuid,
        request: CreateWorkflowRequest,
        updated_by: &str,
    ) -> Result<WorkflowRecord, WorkflowError> {
        let compiled = Self::certify(&request.definition)?;

        let mut tx = self.storage.begin().await?;
        let previous = storage::fetch_workflow(&mut tx, id)
            .await?
            .ok_or(WorkflowError::WorkflowNotFound(id))?;

        let record = WorkflowRecord {
            id: Uuid::new_v4(),
            name: request.name,
            description: request.description,
            definition: request.definition,
            version: previous.version + 1,
            is_active: false,
            created_at: Utc::now(),
            updated_at: None,
            created_by: updated_by.to_string(),
        };

        storage::set_workflow_active(&mut tx, id, false).await?;
        storage::insert_workflow(&mut tx, &record).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        self.registry.insert(record.id, Arc::new(compiled));
        tracing::info!(
            "🔄 Workflow '{}' updated to v{} ({} supersedes {})",
            record.name, record.version, record.id, id
        );

        Ok(record)
    }

    pub async fn activate_workflow(&self, id: Uuid) -> Result<bool, WorkflowError> {
        self.set_active(id, true).await
    }

    pub async fn deactivate_workflow(&self, id: Uuid) -> Result<bool, WorkflowError> {
        self.set_active(id, false).await
    }

    /// Delete a definition with its instances; refused while any instance is Running
    pub async fn delete_workflow(&self, id: Uuid) -> Result<bool, WorkflowError> {
        let mut tx = self.storage.begin().await?;

        if storage::fetch_workflow(&mut tx, id).await?.is_none() {
            return Ok(false);
        }
        if storage::count_running_instances(&mut tx, id).await? > 0 {
            return Err(WorkflowError::ActiveInstances(id));
        }

        let deleted = storage::delete_workflow_cascade(&mut tx, id).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        self.registry.remove(&id);
        tracing::info!("🗑️ Deleted workflow {}", id);

        Ok(deleted)
    }

    /// Structural check for authoring tools
    pub fn validate_definition_text(&self, text: &str) -> bool {
        validate_definition(text)
    }

    /// Compiled definition of a stored record, via the registry
    pub fn compiled(&self, record: &WorkflowRecord) -> Result<Arc<CompiledDefinition>, WorkflowError> {
        self.registry.get_or_compile(record)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool, WorkflowError> {
        let mut tx = self.storage.begin().await?;
        let changed = storage::set_workflow_active(&mut tx, id, active).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        if changed {
            tracing::info!(
                "{} Workflow {} {}",
                if active { "▶️" } else { "⏸️" },
                id,
                if active { "activated" } else { "deactivated" }
            );
        }
        Ok(changed)
    }

    fn certify(text: &str) -> Result<CompiledDefinition, WorkflowError> {
        let definition = parse_definition(text)?;
        check_definition(&definition).map_err(WorkflowError::InvalidDefinition)?;
        Ok(CompiledDefinition::compile(definition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{WorkflowInstance, WorkflowStatus};
    use serde_json::json;

    const DEFINITION: &str = r#"{
        "name": "Leave request",
        "startStepId": "request",
        "steps": [
            { "id": "request", "name": "Request", "type": "manual" },
            { "id": "approve", "name": "Approve", "type": "approval", "assignedRole": "manager" }
        ],
        "transitions": [{ "fromStepId": "request", "toStepId": "approve" }]
    }"#;

    fn request(name: &str, definition: &str) -> CreateWorkflowRequest {
        CreateWorkflowRequest {
            name: name.into(),
            description: "test".into(),
            definition: definition.into(),
        }
    }

    async fn service() -> WorkflowService {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        WorkflowService::new(storage, Arc::new(DefinitionRegistry::new()))
    }

    #[tokio::test]
    async fn create_starts_inactive_at_version_one() {
        let service = service().await;
        let record = service
            .create_workflow(request("Leave", DEFINITION), "admin")
            .await
            .unwrap();

        assert_eq!(record.version, 1);
        assert!(!record.is_active);
        assert!(service.list_active_workflows().await.unwrap().is_empty());
        assert_eq!(service.list_workflows().await.unwrap().len(), 1);
        assert!(service.registry.get(&record.id).is_some());
    }

    #[tokio::test]
    async fn create_rejects_bad_definitions() {
        let service = service().await;
        assert!(matches!(
            service.create_workflow(request("Bad", "nope"), "admin").await,
            Err(WorkflowError::MalformedDefinition(_))
        ));

        let ghost = DEFINITION.replace(r#""startStepId": "request""#, r#""startStepId": "ghost""#);
        assert!(matches!(
            service.create_workflow(request("Ghost", &ghost), "admin").await,
            Err(WorkflowError::InvalidDefinition(_))
        ));
    }

    #[tokio::test]
    async fn update_creates_next_version_and_retires_previous() {
        let service = service().await;
        let first = service
            .create_workflow(request("Leave", DEFINITION), "admin")
            .await
            .unwrap();
        assert!(service.activate_workflow(first.id).await.unwrap());

        let second = service
            .update_workflow(first.id, request("Leave v2", DEFINITION), "editor")
            .await
            .unwrap();

        assert_eq!(second.version, 2);
        assert!(!second.is_active);
        assert!(!service.get_workflow(first.id).await.unwrap().unwrap().is_active);

        assert!(matches!(
            service
                .update_workflow(Uuid::new_v4(), request("x", DEFINITION), "editor")
                .await,
            Err(WorkflowError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn activate_unknown_workflow_is_false() {
        let service = service().await;
        assert!(!service.activate_workflow(Uuid::new_v4()).await.unwrap());
        assert!(!service.deactivate_workflow(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_refuses_running_instances() {
        let service = service().await;
        let record = service
            .create_workflow(request("Leave", DEFINITION), "admin")
            .await
            .unwrap();

        let instance = WorkflowInstance {
            id: Uuid::new_v4(),
            workflow_id: record.id,
            tenant_id: None,
            instance_data: json!({}),
            status: WorkflowStatus::Running,
            current_step_id: None,
            started_at: Utc::now(),
            completed_at: None,
            initiated_by: "alice".into(),
        };
        let mut tx = service.storage.begin().await.unwrap();
        storage::insert_instance(&mut tx, &instance).await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            service.delete_workflow(record.id).await,
            Err(WorkflowError::ActiveInstances(_))
        ));

        let mut cancelled = instance.clone();
        cancelled.status = WorkflowStatus::Cancelled;
        let mut tx = service.storage.begin().await.unwrap();
        storage::update_instance(&mut tx, &cancelled).await.unwrap();
        tx.commit().await.unwrap();

        assert!(service.delete_workflow(record.id).await.unwrap());
        assert!(service.get_workflow(record.id).await.unwrap().is_none());
        assert!(service.registry.get(&record.id).is_none());
        assert!(!service.delete_workflow(record.id).await.unwrap());
    }
}
