/// tenantflow server entry point
///
/// Loads configuration from the environment and serves:
/// - Workflow definition API at /api/workflows/*
/// - Instance lifecycle API at /api/instances/* and /api/tasks
/// - Tenant forms and plugins at /api/tenants/{tenant}/*
/// - Health check at /healthz

use tenantflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Defaults to 0.0.0.0:3004, ./data and ./plugins
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
