/// Form engine: validate, transform and process forms through tenant plugins
///
/// Stateless façade over the plugin loader. Every operation falls back to a
/// default when the tenant has no plugin for it, and plugin faults become
/// result values rather than errors.

use crate::{
    forms::types::FormData,
    plugin::{
        contracts::{
            CustomValidator, FormConfiguration, FormProcessingResult, FormProcessor, ValidationContext,
            TenantPlugin, ValidationError, ValidationResult, ValidationRule,
        },
        PluginLoader,
    },
};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct FormEngine {
    loader: Arc<PluginLoader>,
}

impl FormEngine {
    pub fn new(loader: Arc<PluginLoader>) -> Self {
        Self { loader }
    }

    /// Validate, transform, then process a form
    pub async fn submit_form(&self, form: &FormData) -> FormProcessingResult {
        tracing::info!(
            "📝 Processing form submission for tenant {}, form {}",
            form.tenant_id, form.form_id
        );

        let validation = self.validate_form(form).await;
        if !validation.is_valid {
            return FormProcessingResult {
                is_successful: false,
                form_id: Some(form.form_id.clone()),
                errors: validation.errors,
                messages: vec!["Form validation failed".to_string()],
                ..Default::default()
            };
        }

        let transformed = self.transform_form_data(form).await;

        let Some(processor) = self.loader.load_plugin::<dyn FormProcessor>(&form.tenant_id).await else {
            return FormProcessingResult {
                is_successful: true,
                form_id: Some(form.form_id.clone()),
                processed_data: Some(transformed),
                messages: vec!["Form processed with default handler".to_string()],
                ..Default::default()
            };
        };

        match processor
            .process_form(&form.form_type, &transformed, &Self::context(form))
            .await
        {
            Ok(result) => {
                tracing::info!(
                    "✅ Form {} processed by '{}' for tenant {}",
                    form.form_id,
                    processor.name(),
                    form.tenant_id
                );
                result
            }
            Err(e) => {
                tracing::error!(
                    "❌ Error processing form {} for tenant {}: {}",
                    form.form_id, form.tenant_id, e
                );
                FormProcessingResult {
                    is_successful: false,
                    form_id: Some(form.form_id.clone()),
                    errors: vec![ValidationError::new(
                        "",
                        "An error occurred processing the form",
                        "PROCESSING_ERROR",
                    )],
                    ..Default::default()
                }
            }
        }
    }

    /// Tenant validator's verdict, valid when the tenant has none
    pub async fn validate_form(&self, form: &FormData) -> ValidationResult {
        let Some(validator) = self.loader.load_plugin::<dyn CustomValidator>(&form.tenant_id).await else {
            return ValidationResult::valid();
        };

        let data = Value::Object(form.fields.clone());
        match validator.validate(&data, &Self::context(form)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    "❌ Error validating form {} for tenant {}: {}",
                    form.form_id, form.tenant_id, e
                );
                ValidationResult::failure("VALIDATION_ERROR", "Validation error occurred")
            }
        }
    }

    /// Processor-transformed fields, or the raw fields when there is no processor or it faults
    pub async fn transform_form_data(&self, form: &FormData) -> Value {
        let raw = Value::Object(form.fields.clone());

        let Some(processor) = self.loader.load_plugin::<dyn FormProcessor>(&form.tenant_id).await else {
            return raw;
        };

        match processor.transform_form_data(&form.form_type, &raw).await {
            Ok(transformed) => transformed,
            Err(e) => {
                tracing::error!(
                    "❌ Error transforming form data for tenant {}, form {}: {}",
                    form.tenant_id, form.form_id, e
                );
                raw
            }
        }
    }

    pub async fn get_form_configuration(&self, tenant_id: &str, form_type: &str) -> FormConfiguration {
        let Some(processor) = self.loader.load_plugin::<dyn FormProcessor>(tenant_id).await else {
            return FormConfiguration::default_for(form_type);
        };

        processor
            .get_form_configuration(form_type)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(
                    "❌ Error getting form configuration for tenant {}, form type {}: {}",
                    tenant_id, form_type, e
                );
                FormConfiguration::default_for(form_type)
            })
    }

    pub async fn get_validation_rules(&self, tenant_id: &str, form_type: &str) -> Vec<ValidationRule> {
        let Some(validator) = self.loader.load_plugin::<dyn CustomValidator>(tenant_id).await else {
            return Vec::new();
        };

        validator
            .get_validation_rules(form_type)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(
                    "❌ Error getting validation rules for tenant {}, form type {}: {}",
                    tenant_id, form_type, e
                );
                Vec::new()
            })
    }

    fn context(form: &FormData) -> ValidationContext {
        ValidationContext {
            tenant_id: form.tenant_id.clone(),
            user_id: form.user_id.clone(),
            form_id: form.form_id.clone(),
            ..Default::default()
        }
    }
}
