mod common;

use common::{fields, loader, sample_plugins_dir, write_unit};
use serde_json::json;
use std::sync::Arc;
use tenantflow::{
    config::PluginConfig,
    forms::{FormData, FormEngine},
    plugin::PluginLoader,
};

fn sample_engine() -> FormEngine {
    FormEngine::new(Arc::new(loader(&sample_plugins_dir())))
}

fn registration(tenant: &str, value: serde_json::Value) -> FormData {
    let mut form = FormData::new(tenant, "registration", fields(value));
    form.user_id = "jane".to_string();
    form
}

#[tokio::test]
async fn tenant_rules_accept_a_valid_registration() {
    let engine = sample_engine();
    let form = registration(
        "tenant-a",
        json!({
            "email": "Jane@Company-A.com",
            "firstName": "  Jane",
            "lastName": "Doe",
            "age": 30,
            "phone": "+15551234567"
        }),
    );

    let validation = engine.validate_form(&form).await;
    assert!(validation.is_valid, "{:?}", validation.errors);

    let result = engine.submit_form(&form).await;
    assert!(result.is_successful);
    assert_eq!(result.messages, vec!["Registration received"]);

    let processed = result.processed_data.unwrap();
    assert_eq!(processed["email"], "jane@company-a.com");
    assert_eq!(processed["firstName"], "Jane");
    assert!(processed["reference"].as_str().unwrap().starts_with("A-"));
}

#[tokio::test]
async fn tenant_rules_report_every_violation() {
    let engine = sample_engine();
    let form = registration(
        "tenant-a",
        json!({ "email": "jane@gmail.com", "firstName": "Jane", "age": 16, "phone": "555-1234" }),
    );

    let validation = engine.validate_form(&form).await;
    assert!(!validation.is_valid);
    let codes: Vec<_> = validation.errors.iter().map(|e| e.code.as_str()).collect();
    assert_eq!(codes, vec!["REQUIRED", "INVALID_DOMAIN", "MIN_AGE", "INVALID_PHONE"]);
    assert_eq!(validation.errors[0].field, "lastName");

    let result = engine.submit_form(&form).await;
    assert!(!result.is_successful);
    assert_eq!(result.messages, vec!["Form validation failed"]);
    assert_eq!(result.errors.len(), 4);
}

#[tokio::test]
async fn the_same_form_is_judged_by_each_tenant_separately() {
    let engine = sample_engine();
    let data = json!({ "email": "someone@gmail.com" });

    assert!(!engine.validate_form(&registration("tenant-a", data.clone())).await.is_valid);

    let tenant_b = registration("tenant-b", data);
    assert!(engine.validate_form(&tenant_b).await.is_valid);

    let result = engine.submit_form(&tenant_b).await;
    assert!(result.is_successful);
    assert_eq!(result.messages, vec!["Form processed with default handler"]);
    assert_eq!(result.processed_data.unwrap(), json!({ "email": "someone@gmail.com" }));
}

#[tokio::test]
async fn tenants_without_plugins_get_defaults() {
    let engine = sample_engine();
    let form = registration("tenant-c", json!({ "anything": "goes" }));

    assert!(engine.validate_form(&form).await.is_valid);
    assert!(engine.get_validation_rules("tenant-c", "registration").await.is_empty());
    assert_eq!(engine.get_form_configuration("tenant-c", "registration").await.display_name, "registration");
}

#[tokio::test]
async fn configuration_and_rules_come_from_the_plugins() {
    let engine = sample_engine();

    let config = engine.get_form_configuration("tenant-a", "registration").await;
    assert_eq!(config.display_name, "Tenant A registration");
    assert_eq!(config.fields.len(), 3);
    assert!(config.fields.iter().all(|f| f.is_required));

    let rules = engine.get_validation_rules("tenant-a", "registration").await;
    assert_eq!(rules.len(), 4);
    assert_eq!(rules[2].rule_value, Some(json!(18)));
}

#[tokio::test]
async fn tenant_configuration_reaches_plugin_initialize() {
    let mut config = PluginConfig::new(sample_plugins_dir().display().to_string());
    config
        .tenant_configurations
        .insert("tenant-a".into(), fields(json!({ "approvedDomains": ["@example.com"], "minimumAge": 21 })));
    let engine = FormEngine::new(Arc::new(PluginLoader::new(config)));

    let ok = registration(
        "tenant-a",
        json!({ "email": "jane@example.com", "firstName": "Jane", "lastName": "Doe", "age": 21 }),
    );
    assert!(engine.validate_form(&ok).await.is_valid);

    let young = registration(
        "tenant-a",
        json!({ "email": "jane@example.com", "firstName": "Jane", "lastName": "Doe", "age": 19 }),
    );
    let result = engine.validate_form(&young).await;
    assert_eq!(result.errors[0].code, "MIN_AGE");
}

#[tokio::test]
async fn plugin_faults_become_result_values() {
    let root = tempfile::tempdir().unwrap();
    write_unit(
        root.path(),
        "tenant-x",
        "faulty.lua",
        r#"
        register("validator", function()
            return { tenant_id = "tenant-x", validate = function(self, data, ctx) error("validator crashed") end }
        end)
        register("form_processor", function()
            return {
                tenant_id = "tenant-x",
                transform_form_data = function(self, form_type, data) error("transform crashed") end,
                process_form = function(self, form_type, data, ctx) error("processor crashed") end,
                get_form_configuration = function(self, form_type) error("config crashed") end,
            }
        end)
        "#,
    );
    let engine = FormEngine::new(Arc::new(loader(root.path())));
    let form = FormData::new("tenant-x", "contact", fields(json!({ "a": 1 })));

    let validation = engine.validate_form(&form).await;
    assert!(!validation.is_valid);
    assert_eq!(validation.errors[0].code, "VALIDATION_ERROR");

    assert_eq!(engine.transform_form_data(&form).await, json!({ "a": 1 }));
    assert_eq!(engine.get_form_configuration("tenant-x", "contact").await.display_name, "contact");
}

#[tokio::test]
async fn processor_faults_surface_as_processing_errors() {
    let root = tempfile::tempdir().unwrap();
    write_unit(
        root.path(),
        "tenant-x",
        "processor.lua",
        r#"
        register("form_processor", function()
            return {
                tenant_id = "tenant-x",
                process_form = function(self, form_type, data, ctx) error("processor crashed") end,
            }
        end)
        "#,
    );
    let engine = FormEngine::new(Arc::new(loader(root.path())));
    let form = FormData::new("tenant-x", "contact", fields(json!({ "a": 1 })));

    let result = engine.submit_form(&form).await;
    assert!(!result.is_successful);
    assert_eq!(result.errors[0].code, "PROCESSING_ERROR");
    assert_eq!(result.form_id.as_deref(), Some(form.form_id.as_str()));
}
