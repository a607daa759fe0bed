/// tenantflow: tenant-isolated plugins and step-based approval workflows
///
/// This library provides the per-tenant Lua plugin loader, the form dispatch
/// layer built on it, the workflow definition model and the step state
/// machine that drives workflow instances.

// Core configuration and setup
pub mod config;

// Error taxonomy of the service boundary
pub mod error;

// Tenant plugin layer - isolation contexts, capability contracts, loader and cache
pub mod plugin;

// Form dispatch through tenant plugins
pub mod forms;

// Workflow definitions - parsing, validation, storage and registry
pub mod workflow;

// Workflow runtime - step state machine and instance lifecycle
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::WorkflowError;
pub use forms::{FormData, FormEngine};
pub use plugin::PluginLoader;
pub use runtime::{InstanceService, WorkflowEngine};
pub use server::start_server;
pub use workflow::{WorkflowDefinition, WorkflowService};
