/// Workflow Management Layer
///
/// Definitions, their persistence and the in-memory compiled registry:
/// - Record types (definitions, instances, steps, audit entries)
/// - Definition text parser, structural validator and petgraph compilation
/// - SQLite persistence with sqlx
/// - Lock-free compiled definition registry using ArcSwap
/// - Versioned definition service

// Core workflow record types
pub mod types;

// Definition authoring format, parser and validator
pub mod definition;

// SQLite persistence layer
pub mod storage;

// Compiled definition cache
pub mod registry;

// Definition CRUD with versioning
pub mod service;

// Re-export commonly used types
pub use definition::{
    parse_definition, serialize_definition, validate_definition, CompiledDefinition,
    StepDefinition, TransitionDefinition, WorkflowDefinition,
};
pub use service::WorkflowService;
pub use types::{
    StepStatus, WorkflowAuditLog, WorkflowInstance, WorkflowInstanceView, WorkflowRecord,
    WorkflowStatus, WorkflowStep,
};
