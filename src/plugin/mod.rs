/// Tenant Plugin Layer
///
/// Per-tenant extension code isolated in its own Lua VM:
/// - Capability contracts (validator, form processor, workflow handler)
/// - Lua isolation contexts with explicit capability registration
/// - Loader with a per-(tenant, capability) cache and hot reload

// Capability traits and boundary payloads
pub mod contracts;

// Hardened per-tenant Lua VM and JSON <-> Lua conversion
pub mod sandbox;

// Contract implementation backed by a Lua plugin table
pub mod lua_plugin;

// Discovery, verification and caching
pub mod loader;

// Re-export commonly used types
pub use contracts::{
    CapabilityKind, CustomValidator, FormProcessor, LoadedPlugin, PluginCapability, PluginSummary,
    TenantPlugin, WorkflowHandler,
};
pub use loader::PluginLoader;
