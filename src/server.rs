/// Server setup and initialization
///
/// Wires together all components: storage, definition registry, plugin loader,
/// workflow runtime, form engine and HTTP routes.

use crate::{
    api::{create_api_routes, AppState},
    config::{Config, PluginConfig},
    forms::FormEngine,
    plugin::PluginLoader,
    runtime::{InstanceService, WorkflowEngine},
    workflow::{registry::DefinitionRegistry, storage::WorkflowStorage, WorkflowService},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
///
/// Opens (or creates) the workflow database under the configured data
/// directory and loads tenant plugin configuration before wiring the services.
pub async fn create_app(mut config: Config) -> Result<Router> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    let storage = WorkflowStorage::open(&config.database.database_path()).await?;

    tracing::info!("🔧 Loading tenant plugin configuration");
    config.plugins.load_tenant_configurations()?;

    build_app(storage, config.plugins).await
}

/// Wire services over an already opened storage
pub async fn build_app(storage: WorkflowStorage, plugins: PluginConfig) -> Result<Router> {
    tracing::info!("📊 Initializing definition registry");
    let registry = Arc::new(DefinitionRegistry::new());
    registry
        .init_from_storage(&storage)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    tracing::info!("🔌 Initializing tenant plugin loader");
    let loader = Arc::new(PluginLoader::new(plugins));

    tracing::info!("🚀 Initializing workflow engine");
    let engine = Arc::new(WorkflowEngine::new(
        storage.clone(),
        Arc::clone(&registry),
        Arc::clone(&loader),
    ));

    let state = AppState {
        workflows: WorkflowService::new(storage.clone(), registry),
        instances: InstanceService::new(storage, engine),
        forms: FormEngine::new(Arc::clone(&loader)),
        plugins: loader,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_api_routes().with_state(state));

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting tenantflow server...");

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config).await?;

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
