/// Tenant plugin contracts
///
/// Capability traits a tenant extension can implement, plus the payloads that
/// cross the plugin boundary. Payloads are plain serde structs so they can be
/// produced by sandboxed plugin code as JSON-shaped values.

use crate::config::ConfigMap;
use anyhow::Result;
use async_trait::async_trait;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr, sync::Arc};

/// Named extension point a tenant may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Validator,
    FormProcessor,
    WorkflowHandler,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Validator,
        CapabilityKind::FormProcessor,
        CapabilityKind::WorkflowHandler,
    ];

    /// Name used by plugin code in `register(kind, factory)`
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Validator => "validator",
            CapabilityKind::FormProcessor => "form_processor",
            CapabilityKind::WorkflowHandler => "workflow_handler",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validator" => Ok(CapabilityKind::Validator),
            "form_processor" => Ok(CapabilityKind::FormProcessor),
            "workflow_handler" => Ok(CapabilityKind::WorkflowHandler),
            other => Err(anyhow::anyhow!("Unknown plugin capability: {}", other)),
        }
    }
}

/// Base contract shared by every tenant plugin
#[async_trait]
pub trait TenantPlugin: Send + Sync {
    /// Tenant this plugin serves; must equal the tenant it was loaded for
    fn tenant_id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    async fn initialize(&self, configuration: &ConfigMap) -> Result<()>;
}

#[async_trait]
pub trait CustomValidator: TenantPlugin {
    async fn validate(&self, data: &Value, context: &ValidationContext) -> Result<ValidationResult>;
    async fn get_validation_rules(&self, form_type: &str) -> Result<Vec<ValidationRule>>;
}

#[async_trait]
pub trait FormProcessor: TenantPlugin {
    async fn process_form(
        &self,
        form_type: &str,
        data: &Value,
        context: &ValidationContext,
    ) -> Result<FormProcessingResult>;
    async fn transform_form_data(&self, form_type: &str, raw: &Value) -> Result<Value>;
    async fn get_form_configuration(&self, form_type: &str) -> Result<FormConfiguration>;
}

#[async_trait]
pub trait WorkflowHandler: TenantPlugin {
    async fn execute_step(&self, step_name: &str, context: &WorkflowContext) -> Result<WorkflowResult>;
    async fn get_workflow_steps(&self, workflow_type: &str) -> Result<Vec<WorkflowStepInfo>>;
    /// Preferred successor of `current_step`, `None` for no preference
    async fn get_next_step(&self, current_step: &str, context: &WorkflowContext) -> Result<Option<String>>;
}

/// A loaded, tenant-verified plugin tagged with the capability it was registered for
#[derive(Clone)]
pub enum LoadedPlugin {
    Validator(Arc<dyn CustomValidator>),
    FormProcessor(Arc<dyn FormProcessor>),
    WorkflowHandler(Arc<dyn WorkflowHandler>),
}

impl LoadedPlugin {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            LoadedPlugin::Validator(_) => CapabilityKind::Validator,
            LoadedPlugin::FormProcessor(_) => CapabilityKind::FormProcessor,
            LoadedPlugin::WorkflowHandler(_) => CapabilityKind::WorkflowHandler,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            LoadedPlugin::Validator(p) => p.tenant_id(),
            LoadedPlugin::FormProcessor(p) => p.tenant_id(),
            LoadedPlugin::WorkflowHandler(p) => p.tenant_id(),
        }
    }

    pub fn summary(&self) -> PluginSummary {
        let (name, version) = match self {
            LoadedPlugin::Validator(p) => (p.name(), p.version()),
            LoadedPlugin::FormProcessor(p) => (p.name(), p.version()),
            LoadedPlugin::WorkflowHandler(p) => (p.name(), p.version()),
        };

        PluginSummary {
            tenant_id: self.tenant_id().to_string(),
            name: name.to_string(),
            version: version.to_string(),
            kind: self.kind(),
        }
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        f.debug_struct("LoadedPlugin")
            .field("kind", &summary.kind)
            .field("tenant_id", &summary.tenant_id)
            .field("name", &summary.name)
            .field("version", &summary.version)
            .finish()
    }
}

/// Ties a capability trait object type to its `LoadedPlugin` variant
///
/// Lets callers ask for `loader.load_plugin::<dyn CustomValidator>(tenant)`.
pub trait PluginCapability: Send + Sync {
    const KIND: CapabilityKind;

    fn from_loaded(plugin: &LoadedPlugin) -> Option<Arc<Self>>;
}

impl PluginCapability for dyn CustomValidator {
    const KIND: CapabilityKind = CapabilityKind::Validator;

    fn from_loaded(plugin: &LoadedPlugin) -> Option<Arc<Self>> {
        match plugin {
            LoadedPlugin::Validator(p) => Some(p.clone()),
            _ => None,
        }
    }
}

impl PluginCapability for dyn FormProcessor {
    const KIND: CapabilityKind = CapabilityKind::FormProcessor;

    fn from_loaded(plugin: &LoadedPlugin) -> Option<Arc<Self>> {
        match plugin {
            LoadedPlugin::FormProcessor(p) => Some(p.clone()),
            _ => None,
        }
    }
}

impl PluginCapability for dyn WorkflowHandler {
    const KIND: CapabilityKind = CapabilityKind::WorkflowHandler;

    fn from_loaded(plugin: &LoadedPlugin) -> Option<Arc<Self>> {
        match plugin {
            LoadedPlugin::WorkflowHandler(p) => Some(p.clone()),
            _ => None,
        }
    }
}

/// Identity of a loaded plugin, for admin listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSummary {
    pub tenant_id: String,
    pub name: String,
    pub version: String,
    pub kind: CapabilityKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub errors: Vec<ValidationError>,
    #[serde(default)]
    pub metadata: ConfigMap,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn failure(code: &str, message: &str) -> Self {
        Self {
            is_valid: false,
            errors: vec![ValidationError::new("", message, code)],
            metadata: ConfigMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ValidationError {
    pub fn new(field: &str, message: &str, code: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
            code: code.to_string(),
            value: None,
        }
    }
}

/// Who is submitting what, passed alongside form data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationContext {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub form_id: String,
    #[serde(default)]
    pub properties: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub rule_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_value: Option<Value>,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormProcessingResult {
    pub is_successful: bool,
    #[serde(default)]
    pub form_id: Option<String>,
    #[serde(default)]
    pub processed_data: Option<Value>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub messages: Vec<String>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub errors: Vec<ValidationError>,
    #[serde(default)]
    pub metadata: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormConfiguration {
    #[serde(default)]
    pub form_type: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub fields: Vec<FormField>,
    #[serde(default)]
    pub settings: ConfigMap,
}

impl FormConfiguration {
    /// Configuration used when a tenant has no form processor
    pub fn default_for(form_type: &str) -> Self {
        Self {
            form_type: form_type.to_string(),
            display_name: form_type.to_string(),
            description: String::new(),
            is_active: true,
            fields: Vec::new(),
            settings: ConfigMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub field_type: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub properties: ConfigMap,
}

/// Execution context handed to a workflow handler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub variables: ConfigMap,
    #[serde(default)]
    pub input_data: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub is_successful: bool,
    #[serde(default)]
    pub next_step: Option<String>,
    #[serde(default)]
    pub output_data: ConfigMap,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub messages: Vec<String>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub errors: Vec<StepError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub step: Option<String>,
}

/// A step a workflow handler declares for a workflow type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default)]
    pub configuration: ConfigMap,
}

fn active_by_default() -> bool {
    true
}

/// Deserialize a list, also accepting an empty object or null
///
/// Sandboxed plugin code cannot tell an empty list from an empty map.
pub fn list_or_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListShape<T> {
        List(Vec<T>),
        Map(Map<String, Value>),
        Null(()),
    }

    match ListShape::<T>::deserialize(deserializer)? {
        ListShape::List(items) => Ok(items),
        ListShape::Map(map) if map.is_empty() => Ok(Vec::new()),
        ListShape::Map(_) => Err(D::Error::custom("expected a list")),
        ListShape::Null(()) => Ok(Vec::new()),
    }
}

/// `list_or_empty` for a whole value rather than a field
pub fn list_from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<Vec<T>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        other => serde_json::from_value(other)
            .map_err(|e| anyhow::anyhow!("Expected a list from plugin: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capability_names_round_trip() {
        for kind in CapabilityKind::ALL {
            assert_eq!(kind.as_str().parse::<CapabilityKind>().unwrap(), kind);
        }
        assert!("reporter".parse::<CapabilityKind>().is_err());
    }

    #[test]
    fn empty_tables_are_accepted_as_empty_lists() {
        let result: ValidationResult =
            serde_json::from_value(json!({ "is_valid": true, "errors": {}, "metadata": {} })).unwrap();
        assert!(result.is_valid);
        assert!(result.errors.is_empty());

        let result: WorkflowResult = serde_json::from_value(json!({ "is_successful": false })).unwrap();
        assert!(result.messages.is_empty());

        let bad: Result<ValidationResult, _> =
            serde_json::from_value(json!({ "is_valid": true, "errors": { "field": "x" } }));
        assert!(bad.is_err());
    }

    #[test]
    fn list_from_value_shapes() {
        let rules: Vec<ValidationRule> = list_from_value(json!({})).unwrap();
        assert!(rules.is_empty());

        let rules: Vec<ValidationRule> =
            list_from_value(json!([{ "field": "email", "rule_type": "required" }])).unwrap();
        assert_eq!(rules[0].field, "email");
        assert!(rules[0].is_active);
    }

    #[test]
    fn default_form_configuration_uses_form_type_as_display_name() {
        let config = FormConfiguration::default_for("expense");
        assert_eq!(config.display_name, "expense");
        assert!(config.is_active);
        assert!(config.fields.is_empty());
    }
}
