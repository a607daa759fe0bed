/// Tenant plugin loader and cache
///
/// Discovers `{plugins_dir}/{tenant_id}/*.lua` units, runs them inside the
/// tenant's isolation context, instantiates what they register for the
/// requested capability and keeps the result cached per (tenant, capability).
///
/// A single async mutex guards both the cache and the isolation contexts and is
/// held for the whole load, so two requests can never build duplicate contexts
/// for the same tenant. Load failures never reach the caller: a broken unit is
/// logged and skipped, a missing directory is simply "no plugins". Unit code
/// runs under the configured execution budget, so a runaway unit holds the
/// lock for at most that long before it is skipped like any other fault.

use crate::{
    config::PluginConfig,
    plugin::{
        contracts::{CapabilityKind, LoadedPlugin, PluginCapability, PluginSummary, TenantPlugin},
        lua_plugin::LuaPlugin,
        sandbox::{Registration, TenantSandbox},
    },
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

struct CacheEntry {
    plugins: Vec<LoadedPlugin>,
    loaded_at: Instant,
}

#[derive(Default)]
struct LoaderState {
    cache: HashMap<(String, CapabilityKind), CacheEntry>,
    /// One isolation context per tenant, created on first load
    contexts: HashMap<String, TenantSandbox>,
}

pub struct PluginLoader {
    config: PluginConfig,
    state: Mutex<LoaderState>,
}

impl PluginLoader {
    pub fn new(config: PluginConfig) -> Self {
        tracing::info!(
            "🔌 Plugin loader rooted at {} (hot reload: {}, cache timeout: {}s)",
            config.plugins_dir, config.enable_hot_reload, config.cache_timeout_secs
        );

        Self {
            config,
            state: Mutex::new(LoaderState::default()),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// First plugin of capability `P` for the tenant, if any
    pub async fn load_plugin<P>(&self, tenant_id: &str) -> Option<Arc<P>>
    where
        P: PluginCapability + ?Sized,
    {
        self.load_all_plugins::<P>(tenant_id).await.into_iter().next()
    }

    /// Every plugin of capability `P` for the tenant, in discovery order
    pub async fn load_all_plugins<P>(&self, tenant_id: &str) -> Vec<Arc<P>>
    where
        P: PluginCapability + ?Sized,
    {
        self.load_kind(tenant_id, P::KIND)
            .await
            .iter()
            .filter_map(P::from_loaded)
            .collect()
    }

    pub async fn is_plugin_available<P>(&self, tenant_id: &str) -> bool
    where
        P: PluginCapability + ?Sized,
    {
        !self.load_all_plugins::<P>(tenant_id).await.is_empty()
    }

    /// Cached or freshly loaded plugins of one capability
    pub async fn load_kind(&self, tenant_id: &str, kind: CapabilityKind) -> Vec<LoadedPlugin> {
        if !is_safe_tenant_id(tenant_id) {
            tracing::warn!("⚠️ Refusing to load plugins for unsafe tenant id {:?}", tenant_id);
            return Vec::new();
        }

        let mut state = self.state.lock().await;
        let key = (tenant_id.to_string(), kind);

        if let Some(entry) = state.cache.get(&key) {
            if is_fresh(self.config.enable_hot_reload, entry.loaded_at.elapsed(), self.config.cache_timeout()) {
                tracing::debug!("📦 Plugin cache hit for {} / {}", tenant_id, kind);
                return entry.plugins.clone();
            }
            tracing::debug!("⌛ Plugin cache expired for {} / {}", tenant_id, kind);
        }

        let plugins = self.discover(&mut state, tenant_id, kind).await;
        state.cache.insert(
            key,
            CacheEntry {
                plugins: plugins.clone(),
                loaded_at: Instant::now(),
            },
        );

        plugins
    }

    /// Drop the tenant's cache entries and tear down its isolation context
    pub async fn reload_tenant_plugins(&self, tenant_id: &str) {
        let mut state = self.state.lock().await;
        state.cache.retain(|(tenant, _), _| tenant != tenant_id);
        let had_context = state.contexts.remove(tenant_id).is_some();

        tracing::info!(
            "🔄 Reloaded plugins for tenant {} (isolation context dropped: {})",
            tenant_id, had_context
        );
    }

    /// Name, version and capability of every plugin the tenant currently has
    pub async fn plugin_summaries(&self, tenant_id: &str) -> Vec<PluginSummary> {
        let mut summaries = Vec::new();
        for kind in CapabilityKind::ALL {
            summaries.extend(self.load_kind(tenant_id, kind).await.iter().map(LoadedPlugin::summary));
        }
        summaries
    }

    fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        Path::new(&self.config.plugins_dir).join(tenant_id)
    }

    async fn discover(
        &self,
        state: &mut LoaderState,
        tenant_id: &str,
        kind: CapabilityKind,
    ) -> Vec<LoadedPlugin> {
        let dir = self.tenant_dir(tenant_id);
        let units = match list_units(&dir).await {
            Ok(units) => units,
            Err(e) => {
                tracing::warn!("📁 No plugins for tenant {} at {}: {}", tenant_id, dir.display(), e);
                return Vec::new();
            }
        };

        if !state.contexts.contains_key(tenant_id) {
            match TenantSandbox::new(tenant_id, self.config.memory_limit_mb, self.config.execution_timeout()) {
                Ok(sandbox) => {
                    state.contexts.insert(tenant_id.to_string(), sandbox);
                }
                Err(e) => {
                    tracing::error!("❌ Failed to create isolation context for {}: {}", tenant_id, e);
                    return Vec::new();
                }
            }
        }
        let Some(sandbox) = state.contexts.get(tenant_id) else {
            return Vec::new();
        };

        let configuration = self.config.tenant_configuration(tenant_id);
        let mut loaded = Vec::new();

        for path in units {
            let unit = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let source = match tokio::fs::read_to_string(&path).await {
                Ok(source) => source,
                Err(e) => {
                    tracing::error!("❌ Failed to read plugin unit {}: {}", path.display(), e);
                    continue;
                }
            };

            let registrations = match sandbox.load_unit(&unit, source).await {
                Ok(registrations) => registrations,
                Err(e) => {
                    tracing::error!("❌ Skipping plugin unit {} for tenant {}: {}", unit, tenant_id, e);
                    continue;
                }
            };

            for registration in registrations.iter().filter(|r| wants(r, kind, &unit)) {
                let plugin = match instantiate(sandbox, registration, &unit).await {
                    Ok(plugin) => plugin,
                    Err(e) => {
                        tracing::error!("❌ Failed to instantiate {} from {}: {}", kind, unit, e);
                        continue;
                    }
                };

                if plugin.tenant_id() != tenant_id {
                    tracing::warn!(
                        "⚠️ Plugin '{}' in {} declares tenant '{}' but was loaded for '{}', rejected",
                        plugin.name(), unit, plugin.tenant_id(), tenant_id
                    );
                    continue;
                }

                if let Err(e) = plugin.initialize(&configuration).await {
                    tracing::error!("❌ Failed to initialize plugin '{}' from {}: {}", plugin.name(), unit, e);
                    continue;
                }

                tracing::info!(
                    "✅ Loaded {} '{}' v{} for tenant {} from {}",
                    kind, plugin.name(), plugin.version(), tenant_id, plugin.unit()
                );
                loaded.push(into_loaded(kind, Arc::new(plugin)));
            }
        }

        loaded
    }
}

/// Cached entries expire only with hot reload on, once older than the timeout
fn is_fresh(hot_reload: bool, age: Duration, timeout: Duration) -> bool {
    !hot_reload || age <= timeout
}

/// A tenant id must be a single plain path component
fn is_safe_tenant_id(tenant_id: &str) -> bool {
    !tenant_id.is_empty()
        && tenant_id != "."
        && tenant_id != ".."
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// `*.lua` files directly inside `dir`, ordered by file name
async fn list_units(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut units = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_lua = path.extension().map(|ext| ext == "lua").unwrap_or(false);
        if is_lua && entry.file_type().await?.is_file() {
            units.push(path);
        }
    }

    units.sort();
    Ok(units)
}

fn wants(registration: &Registration, kind: CapabilityKind, unit: &str) -> bool {
    match registration.capability() {
        Ok(registered) => registered == kind,
        Err(e) => {
            tracing::warn!("⚠️ Ignoring registration in {}: {}", unit, e);
            false
        }
    }
}

async fn instantiate(
    sandbox: &TenantSandbox,
    registration: &Registration,
    unit: &str,
) -> anyhow::Result<LuaPlugin> {
    let instance = sandbox.instantiate(registration).await?;
    LuaPlugin::from_instance(sandbox.vm().clone(), unit, instance)
}

fn into_loaded(kind: CapabilityKind, plugin: Arc<LuaPlugin>) -> LoadedPlugin {
    match kind {
        CapabilityKind::Validator => LoadedPlugin::Validator(plugin),
        CapabilityKind::FormProcessor => LoadedPlugin::FormProcessor(plugin),
        CapabilityKind::WorkflowHandler => LoadedPlugin::WorkflowHandler(plugin),
    }
}
