/// Configuration management for the tenantflow engine
///
/// Handles server configuration, database location, and plugin loader parameters.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, path::Path, time::Duration};

/// Free-form configuration handed to a tenant plugin's `initialize`
pub type ConfigMap = Map<String, Value>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Tenant plugin loader configuration
    pub plugins: PluginConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for workflow persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding `workflows.db` (default: "data")
    pub data_dir: String,
}

impl DatabaseConfig {
    /// Full path of the workflow database file
    pub fn database_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join("workflows.db")
    }
}

/// Plugin loader configuration
///
/// Plugins live under `{plugins_dir}/{tenant_id}/*.lua`, one directory per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Root directory scanned for tenant plugin directories
    pub plugins_dir: String,
    /// Re-scan disk once a cache entry is older than `cache_timeout_secs`
    pub enable_hot_reload: bool,
    /// Cache entry lifetime in seconds (only consulted with hot reload enabled)
    pub cache_timeout_secs: u64,
    /// Heap limit per tenant isolation context in MiB, 0 disables the limit
    pub memory_limit_mb: usize,
    /// Wall-clock budget for a single call into tenant code in milliseconds, 0 disables it
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    /// Optional JSON file mapping tenant id -> configuration object
    pub tenant_config_file: Option<String>,
    /// Per-tenant configuration passed to plugin `initialize`
    #[serde(default)]
    pub tenant_configurations: HashMap<String, ConfigMap>,
}

impl PluginConfig {
    /// Build a loader configuration rooted at `plugins_dir` with default timings
    pub fn new(plugins_dir: impl Into<String>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            enable_hot_reload: true,
            cache_timeout_secs: 30 * 60,
            memory_limit_mb: 64,
            execution_timeout_ms: default_execution_timeout_ms(),
            tenant_config_file: None,
            tenant_configurations: HashMap::new(),
        }
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Configuration for a tenant, empty when none was provided
    pub fn tenant_configuration(&self, tenant_id: &str) -> ConfigMap {
        self.tenant_configurations
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Merge tenant configurations from `tenant_config_file` if one is set
    ///
    /// File format: `{ "tenant-a": { "approvedDomains": ["..."] }, ... }`.
    /// Entries already present in `tenant_configurations` win.
    pub fn load_tenant_configurations(&mut self) -> Result<()> {
        let Some(path) = self.tenant_config_file.clone() else {
            return Ok(());
        };

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read tenant config file '{}': {}", path, e))?;
        let parsed: HashMap<String, ConfigMap> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid tenant config file '{}': {}", path, e))?;

        let count = parsed.len();
        for (tenant_id, config) in parsed {
            self.tenant_configurations.entry(tenant_id).or_insert(config);
        }

        tracing::info!("🔧 Loaded configuration for {} tenants from {}", count, path);
        Ok(())
    }
}

fn default_execution_timeout_ms() -> u64 {
    500
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self::new("plugins")
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("TENANTFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("TENANTFLOW_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("TENANTFLOW_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            plugins: PluginConfig {
                plugins_dir: std::env::var("TENANTFLOW_PLUGINS_DIR")
                    .unwrap_or_else(|_| "plugins".to_string()),
                enable_hot_reload: std::env::var("TENANTFLOW_PLUGIN_HOT_RELOAD")
                    .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                    .unwrap_or(true),
                cache_timeout_secs: std::env::var("TENANTFLOW_PLUGIN_CACHE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30 * 60),
                memory_limit_mb: std::env::var("TENANTFLOW_PLUGIN_MEMORY_LIMIT_MB")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(64),
                execution_timeout_ms: std::env::var("TENANTFLOW_PLUGIN_EXECUTION_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_execution_timeout_ms),
                tenant_config_file: std::env::var("TENANTFLOW_TENANT_CONFIG_FILE").ok(),
                tenant_configurations: HashMap::new(),
            },
        }
    }
}
