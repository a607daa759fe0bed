/// Core workflow record types
///
/// Stored definitions, running instances, their step execution records and the
/// append-only audit trail. Statuses are persisted as their display strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// A stored, versioned workflow definition
///
/// Never mutated in place apart from the active flag: an update creates a new
/// record with `version + 1` and deactivates this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Definition text in the JSON authoring format (see `definition.rs`)
    pub definition: String,
    pub version: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// Lifecycle of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Draft,
    Running,
    Completed,
    Cancelled,
    Failed,
    Suspended,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "Draft",
            WorkflowStatus::Running => "Running",
            WorkflowStatus::Completed => "Completed",
            WorkflowStatus::Cancelled => "Cancelled",
            WorkflowStatus::Failed => "Failed",
            WorkflowStatus::Suspended => "Suspended",
        }
    }

    /// Completed, Cancelled and Failed instances never move again
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Cancelled | WorkflowStatus::Failed
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(WorkflowStatus::Draft),
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            "failed" => Ok(WorkflowStatus::Failed),
            "suspended" => Ok(WorkflowStatus::Suspended),
            other => Err(anyhow::anyhow!("Unknown workflow status: {}", other)),
        }
    }
}

/// Status of a single step execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Rejected,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::InProgress => "InProgress",
            StepStatus::Completed => "Completed",
            StepStatus::Rejected => "Rejected",
            StepStatus::Skipped => "Skipped",
            StepStatus::Failed => "Failed",
        }
    }

    /// Pending or InProgress: part of the frontier
    pub fn is_open(&self) -> bool {
        matches!(self, StepStatus::Pending | StepStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(StepStatus::Pending),
            "inprogress" | "in_progress" => Ok(StepStatus::InProgress),
            "completed" => Ok(StepStatus::Completed),
            "rejected" => Ok(StepStatus::Rejected),
            "skipped" => Ok(StepStatus::Skipped),
            "failed" => Ok(StepStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown step status: {}", other)),
        }
    }
}

/// A running (or finished) traversal of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Tenant whose workflow handler plugin participates, if any
    pub tenant_id: Option<String>,
    /// Opaque instance payload
    pub instance_data: Value,
    pub status: WorkflowStatus,
    pub current_step_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub initiated_by: String,
}

/// Execution record of one definition step within an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Row identity
    pub id: Uuid,
    pub instance_id: Uuid,
    /// Id of the step in the definition
    pub step_id: String,
    pub step_name: String,
    /// Definition step type (manual, approval, automatic, ...)
    pub step_type: String,
    pub status: StepStatus,
    pub assigned_to: Option<String>,
    pub assigned_role: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub step_data: Option<Value>,
    /// Creation order within the instance
    pub sequence: i64,
    /// Outgoing transitions of this record have been fired
    #[serde(skip)]
    pub advanced: bool,
}

/// Append-only audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAuditLog {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub action: String,
    pub step_id: Option<String>,
    pub previous_state: Option<String>,
    pub new_state: Option<String>,
    pub performed_by: String,
    pub timestamp: DateTime<Utc>,
    pub comments: Option<String>,
    pub additional_data: Option<Value>,
}

impl WorkflowAuditLog {
    pub fn new(instance_id: Uuid, action: &str, performed_by: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            action: action.to_string(),
            step_id: None,
            previous_state: None,
            new_state: None,
            performed_by: performed_by.to_string(),
            timestamp: Utc::now(),
            comments: None,
            additional_data: None,
        }
    }

    pub fn step(mut self, step_id: &str) -> Self {
        self.step_id = Some(step_id.to_string());
        self
    }

    pub fn transition(mut self, previous: Option<&str>, new: &str) -> Self {
        self.previous_state = previous.map(str::to_string);
        self.new_state = Some(new.to_string());
        self
    }

    pub fn comments(mut self, comments: Option<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn data(mut self, data: Option<Value>) -> Self {
        self.additional_data = data;
        self
    }
}

/// Instance as returned across the service boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceView {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub tenant_id: Option<String>,
    pub instance_data: Value,
    pub status: WorkflowStatus,
    /// See [`current_step`]
    pub current_step_id: Option<String>,
    pub current_step_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub initiated_by: String,
    /// All step records in creation order
    pub steps: Vec<WorkflowStep>,
}

/// The step an instance is waiting on: its earliest-created open step, none
/// once the instance is finished
pub fn current_step(status: WorkflowStatus, steps: &[WorkflowStep]) -> Option<&WorkflowStep> {
    if status.is_finished() {
        return None;
    }
    steps
        .iter()
        .filter(|s| s.status.is_open())
        .min_by_key(|s| s.sequence)
}

impl WorkflowInstanceView {
    pub fn new(workflow_name: String, instance: WorkflowInstance, mut steps: Vec<WorkflowStep>) -> Self {
        steps.sort_by_key(|s| s.sequence);
        let current = current_step(instance.status, &steps);
        let current_step_id = current.map(|s| s.step_id.clone());
        let current_step_name = current.map(|s| s.step_name.clone());

        Self {
            id: instance.id,
            workflow_id: instance.workflow_id,
            workflow_name,
            tenant_id: instance.tenant_id,
            instance_data: instance.instance_data,
            status: instance.status,
            current_step_id,
            current_step_name,
            started_at: instance.started_at,
            completed_at: instance.completed_at,
            initiated_by: instance.initiated_by,
            steps,
        }
    }

    pub fn open_steps(&self) -> impl Iterator<Item = &WorkflowStep> {
        self.steps.iter().filter(|s| s.status.is_open())
    }
}

/// Request body for creating or updating a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Definition text in the JSON authoring format
    pub definition: String,
}

/// Request body for starting an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWorkflowRequest {
    pub workflow_id: Uuid,
    #[serde(default)]
    pub instance_data: Value,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Request body for completing a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteStepRequest {
    #[serde(default = "approved_by_default")]
    pub approved: bool,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub step_data: Option<Value>,
}

fn approved_by_default() -> bool {
    true
}

/// Actions a user may take on an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowAction {
    Approve,
    Reject,
    Cancel,
}

/// Filter for instance listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<WorkflowStatus>,
}
