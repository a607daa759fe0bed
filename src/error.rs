/// Error taxonomy for the workflow service boundary
///
/// Structural and state errors surface here. Plugin faults never do: the plugin
/// loader and form engine log them and fall back to default behaviour.

use thiserror::Error;
use uuid::Uuid;

use crate::workflow::types::{StepStatus, WorkflowStatus};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("Workflow is not active: {0}")]
    WorkflowInactive(Uuid),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("Step '{step_id}' not found on instance {instance_id}")]
    StepNotFound { instance_id: Uuid, step_id: String },

    #[error("Step '{step_id}' is {status} and cannot be completed")]
    InvalidStepState { step_id: String, status: StepStatus },

    #[error("Instance {instance_id} is {status}: cannot {operation}")]
    InvalidInstanceState {
        instance_id: Uuid,
        status: WorkflowStatus,
        operation: &'static str,
    },

    #[error("Malformed workflow definition: {0}")]
    MalformedDefinition(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Workflow {0} still has running instances")]
    ActiveInstances(Uuid),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
