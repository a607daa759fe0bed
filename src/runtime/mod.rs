/// Workflow Runtime
///
/// Drives workflow instances through their definitions:
/// - Step state machine with tenant handler participation
/// - Instance lifecycle service (start, complete step, cancel, suspend/resume)
/// - One SQLite transaction per operation

// Step state machine over compiled definitions
pub mod engine;

// Instance lifecycle operations and queries
pub mod instances;

// Re-export main types
pub use engine::{InstanceAggregate, WorkflowEngine};
pub use instances::InstanceService;
