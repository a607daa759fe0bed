/// Form Dispatch Layer
///
/// Routes form validation, transformation and processing to tenant plugins,
/// with default behaviour for tenants that have none.

// Submitted form payload
pub mod types;

// Plugin-backed form engine
pub mod engine;

pub use engine::FormEngine;
pub use types::FormData;
