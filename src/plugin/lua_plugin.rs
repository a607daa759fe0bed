/// Lua-backed implementation of the plugin contracts
///
/// Wraps the table returned by a registered factory. Contract methods are
/// looked up on the table and called as `method(self, ...)`; arguments go in as
/// JSON-shaped Lua values and results come back through serde. Calls run
/// through the tenant's [`VmHandle`], off the async workers and under the
/// tenant's execution budget.

use crate::{
    config::ConfigMap,
    plugin::{
        contracts::{
            list_from_value, CustomValidator, FormConfiguration, FormProcessingResult, FormProcessor,
            TenantPlugin, ValidationContext, ValidationResult, ValidationRule, WorkflowContext,
            WorkflowHandler, WorkflowResult, WorkflowStepInfo,
        },
        sandbox::{json_to_lua, lua_to_json, VmHandle},
    },
};
use anyhow::Result;
use async_trait::async_trait;
use mlua::{MultiValue, Table, Value as LuaValue};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub struct LuaPlugin {
    tenant_id: String,
    name: String,
    version: String,
    /// Plugin unit file the factory came from
    unit: String,
    instance: Table,
    /// Keeps the tenant VM alive while this plugin is in use
    vm: VmHandle,
}

impl LuaPlugin {
    /// Read the identity fields off a freshly instantiated plugin table
    pub fn from_instance(vm: VmHandle, unit: &str, instance: Table) -> Result<Self> {
        let tenant_id = match instance
            .raw_get::<LuaValue>("tenant_id")
            .map_err(|e| anyhow::anyhow!("Failed to read tenant_id: {}", e))?
        {
            LuaValue::String(s) => s
                .to_str()
                .map_err(|e| anyhow::anyhow!("Invalid tenant_id: {}", e))?
                .to_string(),
            _ => return Err(anyhow::anyhow!("Plugin from '{}' does not declare a tenant_id", unit)),
        };

        let default_name = unit.trim_end_matches(".lua").to_string();
        let name = Self::string_field(&instance, "name")?.unwrap_or(default_name);
        let version = Self::string_field(&instance, "version")?.unwrap_or_else(|| "0.0.0".to_string());

        Ok(Self {
            tenant_id,
            name,
            version,
            unit: unit.to_string(),
            instance,
            vm,
        })
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    fn string_field(instance: &Table, field: &str) -> Result<Option<String>> {
        match instance
            .raw_get::<LuaValue>(field)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", field, e))?
        {
            LuaValue::Nil => Ok(None),
            LuaValue::String(s) => Ok(Some(
                s.to_str()
                    .map_err(|e| anyhow::anyhow!("Invalid {}: {}", field, e))?
                    .to_string(),
            )),
            other => Err(anyhow::anyhow!("Plugin field '{}' is a {}", field, other.type_name())),
        }
    }

    /// Call `method(self, args...)`; `None` when the plugin does not define it
    async fn call_method(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        let instance = self.instance.clone();
        let name = self.name.clone();
        let method_name = method.to_string();

        let result = self
            .vm
            .enter(move |lua| {
                let function = match instance
                    .get::<LuaValue>(method_name.as_str())
                    .map_err(|e| anyhow::anyhow!("Failed to look up '{}': {}", method_name, e))?
                {
                    LuaValue::Function(f) => f,
                    LuaValue::Nil => return Ok(None),
                    other => {
                        return Err(anyhow::anyhow!(
                            "Plugin '{}' member '{}' is a {}, not a function",
                            name,
                            method_name,
                            other.type_name()
                        ))
                    }
                };

                let mut lua_args = Vec::with_capacity(args.len() + 1);
                lua_args.push(LuaValue::Table(instance));
                for arg in &args {
                    lua_args.push(json_to_lua(lua, arg)?);
                }

                let result: LuaValue = function
                    .call(lua_args.into_iter().collect::<MultiValue>())
                    .map_err(|e| anyhow::anyhow!("Plugin '{}' {} failed: {}", name, method_name, e))?;
                Ok(Some(lua_to_json(result)?))
            })
            .await?;

        tracing::debug!("🔌 {}::{} returned", self.name, method);
        Ok(result)
    }

    /// Call a method the contract requires and deserialize its result
    async fn call_required<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        let value = self
            .call_method(method, args)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Plugin '{}' does not implement {}", self.name, method))?;

        serde_json::from_value(value)
            .map_err(|e| anyhow::anyhow!("Plugin '{}' returned an invalid {} result: {}", self.name, method, e))
    }

    fn to_arg<T: Serialize>(value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(|e| anyhow::anyhow!("Failed to encode plugin argument: {}", e))
    }
}

#[async_trait]
impl TenantPlugin for LuaPlugin {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn initialize(&self, configuration: &ConfigMap) -> Result<()> {
        self.call_method("initialize", vec![Value::Object(configuration.clone())]).await?;
        Ok(())
    }
}

#[async_trait]
impl CustomValidator for LuaPlugin {
    async fn validate(&self, data: &Value, context: &ValidationContext) -> Result<ValidationResult> {
        self.call_required("validate", vec![data.clone(), Self::to_arg(context)?]).await
    }

    async fn get_validation_rules(&self, form_type: &str) -> Result<Vec<ValidationRule>> {
        match self.call_method("get_validation_rules", vec![Value::from(form_type)]).await? {
            Some(rules) => list_from_value(rules),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl FormProcessor for LuaPlugin {
    async fn process_form(
        &self,
        form_type: &str,
        data: &Value,
        context: &ValidationContext,
    ) -> Result<FormProcessingResult> {
        self.call_required(
            "process_form",
            vec![Value::from(form_type), data.clone(), Self::to_arg(context)?],
        )
        .await
    }

    async fn transform_form_data(&self, form_type: &str, raw: &Value) -> Result<Value> {
        Ok(self
            .call_method("transform_form_data", vec![Value::from(form_type), raw.clone()])
            .await?
            .unwrap_or_else(|| raw.clone()))
    }

    async fn get_form_configuration(&self, form_type: &str) -> Result<FormConfiguration> {
        match self.call_method("get_form_configuration", vec![Value::from(form_type)]).await? {
            Some(config) => serde_json::from_value(config)
                .map_err(|e| anyhow::anyhow!("Plugin '{}' returned an invalid form configuration: {}", self.name, e)),
            None => Ok(FormConfiguration::default_for(form_type)),
        }
    }
}

#[async_trait]
impl WorkflowHandler for LuaPlugin {
    async fn execute_step(&self, step_name: &str, context: &WorkflowContext) -> Result<WorkflowResult> {
        self.call_required("execute_step", vec![Value::from(step_name), Self::to_arg(context)?])
            .await
    }

    async fn get_workflow_steps(&self, workflow_type: &str) -> Result<Vec<WorkflowStepInfo>> {
        match self.call_method("get_workflow_steps", vec![Value::from(workflow_type)]).await? {
            Some(steps) => list_from_value(steps),
            None => Ok(Vec::new()),
        }
    }

    async fn get_next_step(&self, current_step: &str, context: &WorkflowContext) -> Result<Option<String>> {
        match self
            .call_method("get_next_step", vec![Value::from(current_step), Self::to_arg(context)?])
            .await?
        {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(next)) => Ok(Some(next)),
            Some(other) => Err(anyhow::anyhow!(
                "Plugin '{}' get_next_step returned {} instead of a step name",
                self.name, other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::sandbox::TenantSandbox;
    use serde_json::json;
    use std::time::Duration;

    async fn plugin_with_budget(source: &str, budget: Duration) -> LuaPlugin {
        let sandbox = TenantSandbox::new("tenant-a", 0, budget).unwrap();
        let registrations = sandbox.load_unit("unit.lua", source.to_string()).await.unwrap();
        let instance = sandbox.instantiate(&registrations[0]).await.unwrap();
        LuaPlugin::from_instance(sandbox.vm().clone(), "unit.lua", instance).unwrap()
    }

    async fn plugin(source: &str) -> LuaPlugin {
        plugin_with_budget(source, Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn validator_methods_are_called_with_self() {
        let validator = plugin(
            r#"
            register("validator", function()
                return {
                    tenant_id = "tenant-a",
                    name = "AgeValidator",
                    version = "2.1.0",
                    min_age = 18,
                    initialize = function(self, config)
                        if config.min_age then self.min_age = config.min_age end
                    end,
                    validate = function(self, data, ctx)
                        if (data.age or 0) < self.min_age then
                            return { is_valid = false, errors = { { field = "age", code = "TOO_YOUNG", message = ctx.user_id } } }
                        end
                        return { is_valid = true, errors = {} }
                    end,
                }
            end)
            "#,
        )
        .await;

        assert_eq!(validator.name(), "AgeValidator");
        assert_eq!(validator.version(), "2.1.0");

        let mut config = ConfigMap::new();
        config.insert("min_age".into(), json!(21));
        validator.initialize(&config).await.unwrap();

        let context = ValidationContext {
            user_id: "bob".into(),
            ..Default::default()
        };
        let result = validator.validate(&json!({ "age": 19 }), &context).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].code, "TOO_YOUNG");
        assert_eq!(result.errors[0].message, "bob");

        let result = validator.validate(&json!({ "age": 40 }), &context).await.unwrap();
        assert!(result.is_valid);
        assert!(validator.get_validation_rules("any").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn optional_methods_fall_back() {
        let processor = plugin(
            r#"register("form_processor", function() return { tenant_id = "tenant-a" } end)"#,
        )
        .await;

        assert_eq!(processor.name(), "unit");
        let raw = json!({ "a": 1 });
        assert_eq!(processor.transform_form_data("f", &raw).await.unwrap(), raw);
        assert_eq!(
            processor.get_form_configuration("f").await.unwrap(),
            FormConfiguration::default_for("f")
        );
        assert!(processor
            .process_form("f", &raw, &ValidationContext::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn next_step_and_runtime_errors() {
        let handler = plugin(
            r#"
            register("workflow_handler", function()
                return {
                    tenant_id = "tenant-a",
                    get_next_step = function(self, current, ctx)
                        if current == "review" then return "approve" end
                        return nil
                    end,
                    execute_step = function(self, step, ctx) error("boom") end,
                }
            end)
            "#,
        )
        .await;

        let context = WorkflowContext::default();
        assert_eq!(
            handler.get_next_step("review", &context).await.unwrap(),
            Some("approve".to_string())
        );
        assert_eq!(handler.get_next_step("other", &context).await.unwrap(), None);
        assert!(handler.execute_step("review", &context).await.is_err());
    }

    #[tokio::test]
    async fn runaway_methods_fail_and_the_plugin_stays_usable() {
        let validator = plugin_with_budget(
            r#"
            register("validator", function()
                return {
                    tenant_id = "tenant-a",
                    validate = function(self, data, ctx)
                        if data.spin then while true do end end
                        return { is_valid = true }
                    end,
                }
            end)
            "#,
            Duration::from_millis(100),
        )
        .await;

        let context = ValidationContext::default();
        let err = validator
            .validate(&json!({ "spin": true }), &context)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("execution budget"), "{}", err);
        assert!(validator.validate(&json!({}), &context).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn tenant_id_is_required() {
        let sandbox = TenantSandbox::new("tenant-a", 0, Duration::ZERO).unwrap();
        let registrations = sandbox
            .load_unit("anon.lua", r#"register("validator", function() return {} end)"#.to_string())
            .await
            .unwrap();
        let instance = sandbox.instantiate(&registrations[0]).await.unwrap();
        assert!(LuaPlugin::from_instance(sandbox.vm().clone(), "anon.lua", instance).is_err());
    }
}
