/// Step-based workflow state machine
///
/// Advances one instance at a time over its compiled definition. Advancement is
/// purely request driven: the engine creates Pending step records and then
/// stops until a caller completes them. All changes of one advancement are made
/// on an in-memory `InstanceAggregate` and written back in the caller's
/// transaction.

use crate::{
    error::WorkflowError,
    plugin::{
        contracts::{WorkflowContext, WorkflowHandler, WorkflowStepInfo},
        PluginLoader,
    },
    workflow::{
        definition::{CompiledDefinition, StepDefinition},
        registry::DefinitionRegistry,
        storage::{self, WorkflowStorage},
        types::{
            current_step, StepStatus, WorkflowAction, WorkflowAuditLog, WorkflowInstance, WorkflowRecord, WorkflowStatus,
            WorkflowStep,
        },
    },
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::SqliteConnection;
use std::{
    collections::HashSet,
    sync::Arc,
};
use uuid::Uuid;

/// Upper bound on advancement rounds per call, so chains of automatic steps
/// (or automatic loops) always return control to the caller
const MAX_ADVANCE_ROUNDS: usize = 64;

/// Identity recorded for engine-driven changes
pub const SYSTEM_USER: &str = "system";

/// An instance with its step records and the audit entries not yet written
#[derive(Debug, Clone)]
pub struct InstanceAggregate {
    pub instance: WorkflowInstance,
    /// Step records in creation order
    pub steps: Vec<WorkflowStep>,
    pending_audit: Vec<WorkflowAuditLog>,
}

impl InstanceAggregate {
    pub fn new(instance: WorkflowInstance) -> Self {
        Self {
            instance,
            steps: Vec::new(),
            pending_audit: Vec::new(),
        }
    }

    pub async fn load(conn: &mut SqliteConnection, id: Uuid) -> Result<Self, WorkflowError> {
        let instance = storage::fetch_instance(&mut *conn, id)
            .await?
            .ok_or(WorkflowError::InstanceNotFound(id))?;
        let steps = storage::fetch_steps(&mut *conn, id).await?;

        Ok(Self {
            instance,
            steps,
            pending_audit: Vec::new(),
        })
    }

    /// Write the instance, every step record and the queued audit entries
    pub async fn save(&mut self, conn: &mut SqliteConnection) -> anyhow::Result<()> {
        self.refresh_current_step();
        storage::update_instance(&mut *conn, &self.instance).await?;
        for step in &self.steps {
            storage::upsert_step(&mut *conn, step).await?;
        }
        for entry in self.pending_audit.drain(..) {
            storage::insert_audit(&mut *conn, &entry).await?;
        }
        Ok(())
    }

    /// Point `current_step_id` at the step the instance is waiting on
    pub fn refresh_current_step(&mut self) {
        self.instance.current_step_id =
            current_step(self.instance.status, &self.steps).map(|s| s.step_id.clone());
    }

    pub fn audit(&mut self, entry: WorkflowAuditLog) {
        self.pending_audit.push(entry);
    }

    pub fn has_open_step(&self) -> bool {
        self.steps.iter().any(|s| s.status.is_open())
    }

    /// Earliest-created open record for a definition step
    pub fn open_step_mut(&mut self, step_id: &str) -> Option<&mut WorkflowStep> {
        self.steps
            .iter_mut()
            .find(|s| s.step_id == step_id && s.status.is_open())
    }

    pub fn latest_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().rev().find(|s| s.step_id == step_id)
    }

    fn create_step(&mut self, definition: &StepDefinition) {
        let sequence = self.steps.iter().map(|s| s.sequence).max().unwrap_or(0) + 1;

        self.steps.push(WorkflowStep {
            id: Uuid::new_v4(),
            instance_id: self.instance.id,
            step_id: definition.id.clone(),
            step_name: definition.name.clone(),
            step_type: definition.step_type.clone(),
            status: StepStatus::Pending,
            assigned_to: definition.assigned_user.clone(),
            assigned_role: definition.assigned_role.clone(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            comments: None,
            step_data: None,
            sequence,
            advanced: false,
        });
        self.refresh_current_step();

        tracing::debug!("➕ Instance {} entered step '{}'", self.instance.id, definition.id);
    }

    fn complete_instance(&mut self) {
        self.instance.status = WorkflowStatus::Completed;
        self.instance.completed_at = Some(Utc::now());
        self.instance.current_step_id = None;
        tracing::info!("🎉 Workflow instance {} completed", self.instance.id);
    }

    fn fail_instance(&mut self, reason: &str) {
        let previous = self.instance.status;
        self.instance.status = WorkflowStatus::Failed;
        self.instance.completed_at = Some(Utc::now());
        self.instance.current_step_id = None;

        let entry = WorkflowAuditLog::new(self.instance.id, "FAILED", SYSTEM_USER)
            .transition(Some(previous.as_str()), WorkflowStatus::Failed.as_str())
            .comments(Some(reason.to_string()));
        self.audit(entry);

        tracing::error!("❌ Workflow instance {} failed: {}", self.instance.id, reason);
    }

    /// Merge an automatic step's output into the instance data object
    fn merge_output(&mut self, output: &Map<String, Value>) {
        if output.is_empty() {
            return;
        }
        match &mut self.instance.instance_data {
            Value::Object(data) => data.extend(output.clone()),
            data @ Value::Null => *data = Value::Object(output.clone()),
            _ => tracing::warn!(
                "⚠️ Instance {} data is not an object, step output not merged",
                self.instance.id
            ),
        }
    }
}

/// Actions `user_id` may take given the instance's state
pub fn available_actions(instance: &WorkflowInstance, steps: &[WorkflowStep], user_id: &str) -> Vec<WorkflowAction> {
    let mut actions = Vec::new();

    let has_task = instance.status == WorkflowStatus::Running
        && steps.iter().any(|s| {
            s.status == StepStatus::Pending
                && (s.assigned_to.as_deref() == Some(user_id) || s.assigned_role.is_some())
        });
    if has_task {
        actions.push(WorkflowAction::Approve);
        actions.push(WorkflowAction::Reject);
    }

    let cancellable = matches!(instance.status, WorkflowStatus::Running | WorkflowStatus::Suspended);
    if cancellable && instance.initiated_by == user_id {
        actions.push(WorkflowAction::Cancel);
    }

    actions
}

/// Workflow state machine
pub struct WorkflowEngine {
    storage: WorkflowStorage,
    definitions: Arc<DefinitionRegistry>,
    plugins: Arc<PluginLoader>,
}

impl WorkflowEngine {
    pub fn new(
        storage: WorkflowStorage,
        definitions: Arc<DefinitionRegistry>,
        plugins: Arc<PluginLoader>,
    ) -> Self {
        Self {
            storage,
            definitions,
            plugins,
        }
    }

    /// Advance an instance as far as it can go without outside input
    pub async fn process_next_step(&self, instance_id: Uuid) -> Result<WorkflowInstance, WorkflowError> {
        let mut tx = self.storage.begin().await?;
        let mut aggregate = InstanceAggregate::load(&mut tx, instance_id).await?;
        let (_, definition) = self.workflow_for(&mut tx, aggregate.instance.workflow_id).await?;

        if self.advance(&mut aggregate, &definition).await {
            aggregate.save(&mut tx).await?;
            tx.commit().await.map_err(anyhow::Error::from)?;
        } else {
            aggregate.refresh_current_step();
        }

        Ok(aggregate.instance)
    }

    /// Running and nothing waiting on a person; false for unknown instances
    pub async fn can_progress_to_next_step(&self, instance_id: Uuid) -> Result<bool, WorkflowError> {
        let Some(instance) = self.storage.get_instance(instance_id).await? else {
            return Ok(false);
        };
        if instance.status != WorkflowStatus::Running {
            return Ok(false);
        }

        let steps = self.storage.get_steps(instance_id).await?;
        Ok(!steps.iter().any(|s| s.status.is_open()))
    }

    /// Approve/reject/cancel options for a user
    pub async fn get_available_actions(
        &self,
        instance_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        let instance = self
            .storage
            .get_instance(instance_id)
            .await?
            .ok_or(WorkflowError::InstanceNotFound(instance_id))?;
        let steps = self.storage.get_steps(instance_id).await?;

        Ok(available_actions(&instance, &steps, user_id))
    }

    /// Steps the tenant's workflow handler declares for a workflow type
    pub async fn get_workflow_steps(&self, tenant_id: &str, workflow_type: &str) -> Vec<WorkflowStepInfo> {
        let Some(handler) = self.plugins.load_plugin::<dyn WorkflowHandler>(tenant_id).await else {
            return Vec::new();
        };

        handler
            .get_workflow_steps(workflow_type)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(
                    "❌ Error getting workflow steps for tenant {}, workflow type {}: {}",
                    tenant_id, workflow_type, e
                );
                Vec::new()
            })
    }

    /// Stored workflow record with its compiled definition
    pub async fn workflow_for(
        &self,
        conn: &mut SqliteConnection,
        workflow_id: Uuid,
    ) -> Result<(WorkflowRecord, Arc<CompiledDefinition>), WorkflowError> {
        let record = storage::fetch_workflow(conn, workflow_id)
            .await?
            .ok_or(WorkflowError::WorkflowNotFound(workflow_id))?;
        let definition = self.definitions.get_or_compile(&record)?;
        Ok((record, definition))
    }

    /// Apply every advancement currently possible; returns whether anything changed
    ///
    /// Never fails: plugin faults are logged and an unresolvable definition
    /// moves the instance to Failed.
    pub async fn advance(&self, aggregate: &mut InstanceAggregate, definition: &CompiledDefinition) -> bool {
        if aggregate.instance.status != WorkflowStatus::Running {
            return false;
        }

        let handler = match aggregate.instance.tenant_id.as_deref() {
            Some(tenant_id) => self.plugins.load_plugin::<dyn WorkflowHandler>(tenant_id).await,
            None => None,
        };
        let handler = handler.as_deref();

        let mut attempted = HashSet::new();
        let mut changed = false;

        for _ in 0..MAX_ADVANCE_ROUNDS {
            if aggregate.instance.status != WorkflowStatus::Running {
                break;
            }

            if aggregate.steps.is_empty() {
                match definition.start_step() {
                    Some(start) => aggregate.create_step(start),
                    None => aggregate.fail_instance(&format!(
                        "start step '{}' is not defined",
                        definition.definition.start_step_id
                    )),
                }
                changed = true;
                continue;
            }

            if aggregate.has_open_step() {
                if self.run_automatic_steps(aggregate, definition, handler, &mut attempted).await {
                    changed = true;
                    continue;
                }
                break;
            }

            self.fire_transitions(aggregate, definition, handler).await;
            changed = true;
        }

        changed
    }

    /// Leave every finished, not yet advanced step along its outgoing transitions
    async fn fire_transitions(
        &self,
        aggregate: &mut InstanceAggregate,
        definition: &CompiledDefinition,
        handler: Option<&dyn WorkflowHandler>,
    ) {
        let mut finished: Vec<usize> = (0..aggregate.steps.len())
            .filter(|&i| aggregate.steps[i].status.is_terminal() && !aggregate.steps[i].advanced)
            .collect();
        finished.sort_by_key(|&i| (aggregate.steps[i].completed_at, aggregate.steps[i].sequence));

        let mut has_transitions = false;
        let mut targets: Vec<String> = Vec::new();

        for index in finished {
            aggregate.steps[index].advanced = true;
            let step_id = aggregate.steps[index].step_id.clone();

            let satisfied: Vec<_> = definition
                .outgoing(&step_id)
                .into_iter()
                .filter(|t| t.is_satisfied())
                .collect();
            if satisfied.is_empty() {
                continue;
            }
            has_transitions = true;

            let preferred = match handler {
                Some(handler) => self.preferred_next(handler, aggregate, index).await,
                None => None,
            };
            let preferred = preferred.filter(|p| satisfied.iter().any(|t| &t.to_step_id == p));

            for transition in satisfied {
                if preferred.as_ref().is_some_and(|p| p != &transition.to_step_id) {
                    continue;
                }
                if !targets.contains(&transition.to_step_id) {
                    targets.push(transition.to_step_id.clone());
                }
            }
        }

        if !has_transitions {
            aggregate.complete_instance();
            return;
        }

        let mut created = 0;
        for target in &targets {
            match definition.step(target) {
                Some(step) => {
                    aggregate.create_step(step);
                    created += 1;
                }
                None => tracing::warn!(
                    "⚠️ Transition target '{}' is not a step of '{}'",
                    target, definition.definition.name
                ),
            }
        }

        if created == 0 {
            aggregate.fail_instance(&format!("no transition target could be resolved from {:?}", targets));
        }
    }

    /// Ask the tenant's handler which successor it prefers; faults mean no preference
    async fn preferred_next(
        &self,
        handler: &dyn WorkflowHandler,
        aggregate: &InstanceAggregate,
        index: usize,
    ) -> Option<String> {
        let step = &aggregate.steps[index];
        let context = workflow_context(aggregate, step);

        match handler.get_next_step(&step.step_id, &context).await {
            Ok(next) => {
                if let Some(next) = &next {
                    tracing::debug!("🔀 Handler routes '{}' to '{}'", step.step_id, next);
                }
                next
            }
            Err(e) => {
                tracing::warn!("⚠️ get_next_step failed after '{}': {}", step.step_id, e);
                None
            }
        }
    }

    /// Execute open automatic steps through the handler; true if any finished
    async fn run_automatic_steps(
        &self,
        aggregate: &mut InstanceAggregate,
        definition: &CompiledDefinition,
        handler: Option<&dyn WorkflowHandler>,
        attempted: &mut HashSet<Uuid>,
    ) -> bool {
        let Some(handler) = handler else {
            return false;
        };

        let candidates: Vec<usize> = (0..aggregate.steps.len())
            .filter(|&i| {
                let step = &aggregate.steps[i];
                step.status.is_open()
                    && !attempted.contains(&step.id)
                    && definition.step(&step.step_id).is_some_and(|d| d.is_automatic())
            })
            .collect();

        let mut progressed = false;
        for index in candidates {
            attempted.insert(aggregate.steps[index].id);

            let context = workflow_context(aggregate, &aggregate.steps[index]);
            let step_id = aggregate.steps[index].step_id.clone();
            let result = match handler.execute_step(&step_id, &context).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Automatic step '{}' on instance {} faulted, left pending: {}",
                        step_id, aggregate.instance.id, e
                    );
                    continue;
                }
            };

            let now = Utc::now();
            let instance_id = aggregate.instance.id;
            let step = &mut aggregate.steps[index];
            let previous = step.status;
            step.started_at.get_or_insert(now);
            step.completed_at = Some(now);
            step.step_data = Some(Value::Object(result.output_data.clone()));

            let entry = if result.is_successful {
                step.status = StepStatus::Completed;
                step.comments = (!result.messages.is_empty()).then(|| result.messages.join("; "));
                WorkflowAuditLog::new(instance_id, "AUTO_COMPLETED", SYSTEM_USER)
                    .step(&step_id)
                    .transition(Some(previous.as_str()), StepStatus::Completed.as_str())
                    .comments(step.comments.clone())
            } else {
                step.status = StepStatus::Failed;
                let errors: Vec<String> = result.errors.iter().map(|e| e.message.clone()).collect();
                step.comments = (!errors.is_empty()).then(|| errors.join("; "));
                WorkflowAuditLog::new(instance_id, "STEP_FAILED", SYSTEM_USER)
                    .step(&step_id)
                    .transition(Some(previous.as_str()), StepStatus::Failed.as_str())
                    .comments(step.comments.clone())
                    .data(Some(json!({ "errors": result.errors })))
            };

            if result.is_successful {
                aggregate.merge_output(&result.output_data);
                tracing::info!("🤖 Automatic step '{}' completed on instance {}", step_id, instance_id);
            } else {
                tracing::warn!("⚠️ Automatic step '{}' failed on instance {}", step_id, instance_id);
            }
            aggregate.audit(entry);
            progressed = true;
        }

        progressed
    }
}

fn workflow_context(aggregate: &InstanceAggregate, step: &WorkflowStep) -> WorkflowContext {
    let as_map = |value: Option<&Value>| match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    WorkflowContext {
        tenant_id: aggregate.instance.tenant_id.clone().unwrap_or_default(),
        user_id: aggregate.instance.initiated_by.clone(),
        workflow_id: aggregate.instance.id.to_string(),
        current_step: step.step_id.clone(),
        variables: as_map(Some(&aggregate.instance.instance_data)),
        input_data: as_map(step.step_data.as_ref()),
    }
}
