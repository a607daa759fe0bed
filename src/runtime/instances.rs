/// Workflow instance service
///
/// Start, complete, cancel, suspend and resume instances. Each operation loads
/// the instance aggregate, mutates it, lets the engine advance it and commits
/// everything in one transaction.

use crate::{
    error::WorkflowError,
    runtime::engine::{InstanceAggregate, WorkflowEngine},
    workflow::{
        storage::{self, WorkflowStorage},
        types::{
            CompleteStepRequest, InstanceFilter, StartWorkflowRequest, StepStatus, WorkflowAuditLog,
            WorkflowInstance, WorkflowInstanceView, WorkflowStatus,
        },
    },
};
use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct InstanceService {
    storage: WorkflowStorage,
    engine: Arc<WorkflowEngine>,
}

impl InstanceService {
    pub fn new(storage: WorkflowStorage, engine: Arc<WorkflowEngine>) -> Self {
        Self { storage, engine }
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Create a Running instance of an active workflow and seed its first step
    pub async fn start_workflow(
        &self,
        request: StartWorkflowRequest,
        initiated_by: &str,
    ) -> Result<WorkflowInstanceView, WorkflowError> {
        let mut tx = self.storage.begin().await?;
        let (record, definition) = self.engine.workflow_for(&mut tx, request.workflow_id).await?;
        if !record.is_active {
            return Err(WorkflowError::WorkflowInactive(record.id));
        }

        let instance = WorkflowInstance {
            id: Uuid::new_v4(),
            workflow_id: record.id,
            tenant_id: request.tenant_id,
            instance_data: request.instance_data,
            status: WorkflowStatus::Running,
            current_step_id: None,
            started_at: Utc::now(),
            completed_at: None,
            initiated_by: initiated_by.to_string(),
        };
        storage::insert_instance(&mut tx, &instance).await?;

        let mut aggregate = InstanceAggregate::new(instance);
        let entry = WorkflowAuditLog::new(aggregate.instance.id, "STARTED", initiated_by)
            .transition(None, WorkflowStatus::Running.as_str());
        aggregate.audit(entry);

        self.engine.advance(&mut aggregate, &definition).await;
        aggregate.save(&mut tx).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        tracing::info!(
            "🚀 Started workflow '{}' v{} as instance {} for {}",
            record.name, record.version, aggregate.instance.id, initiated_by
        );

        Ok(WorkflowInstanceView::new(record.name, aggregate.instance, aggregate.steps))
    }

    /// Approve or reject an open step, then advance the instance
    pub async fn complete_step(
        &self,
        instance_id: Uuid,
        step_id: &str,
        request: CompleteStepRequest,
        completed_by: &str,
    ) -> Result<WorkflowInstanceView, WorkflowError> {
        let mut tx = self.storage.begin().await?;
        let mut aggregate = InstanceAggregate::load(&mut tx, instance_id).await?;

        if aggregate.instance.status != WorkflowStatus::Running {
            return Err(WorkflowError::InvalidInstanceState {
                instance_id,
                status: aggregate.instance.status,
                operation: "complete a step",
            });
        }

        let Some(latest) = aggregate.latest_step(step_id) else {
            return Err(WorkflowError::StepNotFound {
                instance_id,
                step_id: step_id.to_string(),
            });
        };
        let latest_status = latest.status;

        let Some(step) = aggregate.open_step_mut(step_id) else {
            return Err(WorkflowError::InvalidStepState {
                step_id: step_id.to_string(),
                status: latest_status,
            });
        };

        let now = Utc::now();
        let previous = step.status;
        let (status, action) = if request.approved {
            (StepStatus::Completed, "APPROVED")
        } else {
            (StepStatus::Rejected, "REJECTED")
        };
        step.status = status;
        step.started_at.get_or_insert(now);
        step.completed_at = Some(now);
        step.comments = request.comments.clone();
        step.step_data = request.step_data.clone();

        let entry = WorkflowAuditLog::new(instance_id, action, completed_by)
            .step(step_id)
            .transition(Some(previous.as_str()), status.as_str())
            .comments(request.comments)
            .data(request.step_data);
        aggregate.audit(entry);

        tracing::info!("✅ Step '{}' on instance {} {} by {}", step_id, instance_id, status, completed_by);

        let (record, definition) = self.engine.workflow_for(&mut tx, aggregate.instance.workflow_id).await?;
        self.engine.advance(&mut aggregate, &definition).await;
        aggregate.save(&mut tx).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(WorkflowInstanceView::new(record.name, aggregate.instance, aggregate.steps))
    }

    /// Mark the instance Cancelled; repeating it on a Cancelled instance changes nothing
    pub async fn cancel_workflow(
        &self,
        instance_id: Uuid,
        cancelled_by: &str,
        reason: Option<String>,
    ) -> Result<WorkflowInstanceView, WorkflowError> {
        let mut tx = self.storage.begin().await?;
        let mut aggregate = InstanceAggregate::load(&mut tx, instance_id).await?;

        match aggregate.instance.status {
            WorkflowStatus::Cancelled => {
                tracing::debug!("Instance {} already cancelled", instance_id);
                return self.finish_view(tx, aggregate).await;
            }
            status @ (WorkflowStatus::Completed | WorkflowStatus::Failed) => {
                return Err(WorkflowError::InvalidInstanceState {
                    instance_id,
                    status,
                    operation: "cancel",
                });
            }
            _ => {}
        }

        let previous = aggregate.instance.status;
        aggregate.instance.status = WorkflowStatus::Cancelled;
        aggregate.instance.completed_at = Some(Utc::now());

        let entry = WorkflowAuditLog::new(instance_id, "CANCELLED", cancelled_by)
            .transition(Some(previous.as_str()), WorkflowStatus::Cancelled.as_str())
            .comments(reason);
        aggregate.audit(entry);
        aggregate.save(&mut tx).await?;

        tracing::info!("🛑 Instance {} cancelled by {}", instance_id, cancelled_by);
        self.finish_view(tx, aggregate).await
    }

    /// Running → Suspended
    pub async fn suspend_workflow(
        &self,
        instance_id: Uuid,
        suspended_by: &str,
        reason: Option<String>,
    ) -> Result<WorkflowInstanceView, WorkflowError> {
        let mut tx = self.storage.begin().await?;
        let mut aggregate = InstanceAggregate::load(&mut tx, instance_id).await?;
        if aggregate.instance.status != WorkflowStatus::Running {
            return Err(WorkflowError::InvalidInstanceState {
                instance_id,
                status: aggregate.instance.status,
                operation: "suspend",
            });
        }

        aggregate.instance.status = WorkflowStatus::Suspended;
        let entry = WorkflowAuditLog::new(instance_id, "SUSPENDED", suspended_by)
            .transition(Some(WorkflowStatus::Running.as_str()), WorkflowStatus::Suspended.as_str())
            .comments(reason);
        aggregate.audit(entry);
        aggregate.save(&mut tx).await?;

        tracing::info!("⏸️ Instance {} suspended by {}", instance_id, suspended_by);
        self.finish_view(tx, aggregate).await
    }

    /// Suspended → Running, then advance whatever finished meanwhile
    pub async fn resume_workflow(
        &self,
        instance_id: Uuid,
        resumed_by: &str,
    ) -> Result<WorkflowInstanceView, WorkflowError> {
        let mut tx = self.storage.begin().await?;
        let mut aggregate = InstanceAggregate::load(&mut tx, instance_id).await?;
        if aggregate.instance.status != WorkflowStatus::Suspended {
            return Err(WorkflowError::InvalidInstanceState {
                instance_id,
                status: aggregate.instance.status,
                operation: "resume",
            });
        }

        aggregate.instance.status = WorkflowStatus::Running;
        let entry = WorkflowAuditLog::new(instance_id, "RESUMED", resumed_by)
            .transition(Some(WorkflowStatus::Suspended.as_str()), WorkflowStatus::Running.as_str());
        aggregate.audit(entry);

        let (_, definition) = self.engine.workflow_for(&mut tx, aggregate.instance.workflow_id).await?;
        self.engine.advance(&mut aggregate, &definition).await;
        aggregate.save(&mut tx).await?;

        tracing::info!("▶️ Instance {} resumed by {}", instance_id, resumed_by);
        self.finish_view(tx, aggregate).await
    }

    pub async fn get_instance(&self, instance_id: Uuid) -> Result<Option<WorkflowInstanceView>, WorkflowError> {
        let Some(instance) = self.storage.get_instance(instance_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.view(instance).await?))
    }

    /// Newest first, optionally filtered by workflow and status
    pub async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<WorkflowInstanceView>, WorkflowError> {
        let instances = self.storage.list_instances(filter).await?;
        let mut views = Vec::with_capacity(instances.len());
        for instance in instances {
            views.push(self.view(instance).await?);
        }
        Ok(views)
    }

    /// Running instances waiting on `user_id`, oldest first
    pub async fn get_user_tasks(&self, user_id: &str) -> Result<Vec<WorkflowInstanceView>, WorkflowError> {
        let instances = self.storage.user_task_instances(user_id).await?;
        let mut views = Vec::with_capacity(instances.len());
        for instance in instances {
            views.push(self.view(instance).await?);
        }
        Ok(views)
    }

    /// Newest first
    pub async fn get_audit_log(&self, instance_id: Uuid) -> Result<Vec<WorkflowAuditLog>, WorkflowError> {
        if self.storage.get_instance(instance_id).await?.is_none() {
            return Err(WorkflowError::InstanceNotFound(instance_id));
        }
        Ok(self.storage.audit_log(instance_id).await?)
    }

    async fn view(&self, instance: WorkflowInstance) -> Result<WorkflowInstanceView, WorkflowError> {
        let steps = self.storage.get_steps(instance.id).await?;
        let name = self
            .storage
            .get_workflow(instance.workflow_id)
            .await?
            .map(|w| w.name)
            .unwrap_or_default();
        Ok(WorkflowInstanceView::new(name, instance, steps))
    }

    async fn finish_view(
        &self,
        mut tx: Transaction<'static, Sqlite>,
        aggregate: InstanceAggregate,
    ) -> Result<WorkflowInstanceView, WorkflowError> {
        let name = storage::fetch_workflow(&mut tx, aggregate.instance.workflow_id)
            .await?
            .map(|w| w.name)
            .unwrap_or_default();
        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(WorkflowInstanceView::new(name, aggregate.instance, aggregate.steps))
    }
}
