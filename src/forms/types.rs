/// Form submission types

use crate::config::ConfigMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A form as submitted by a user of one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormData {
    #[serde(default)]
    pub form_id: String,
    pub form_type: String,
    /// Filled from the route by the HTTP layer
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub fields: ConfigMap,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default = "draft_status")]
    pub status: String,
}

fn draft_status() -> String {
    "Draft".to_string()
}

impl FormData {
    pub fn new(tenant_id: &str, form_type: &str, fields: ConfigMap) -> Self {
        Self {
            form_id: uuid::Uuid::new_v4().to_string(),
            form_type: form_type.to_string(),
            tenant_id: tenant_id.to_string(),
            user_id: String::new(),
            fields,
            created_at: Utc::now(),
            submitted_at: None,
            status: draft_status(),
        }
    }
}
