use std::env;
use std::sync::Arc;

use fedgrid_common::GatewayConfig;
use fedgrid_grid::InProcessTransport;
use fedgrid_schema::{MemSourceFactory, Registry};
use fedgrid_server::ServerCtx;
use tracing_subscriber::EnvFilter;

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let config_path = env_or_default("FEDGRID_CONFIG", "fedgrid.json");
    let config = GatewayConfig::load_from_json(&config_path)?;

    let registry = Arc::new(Registry::new());
    registry.register_factory(Arc::new(MemSourceFactory::new()));

    let transport = Arc::new(InProcessTransport::new());
    let ctx = ServerCtx::init(config, registry, transport).await?;
    let refresh = ctx.spawn_refresh();

    println!(
        "fedgrid-gateway up (config={config_path}, schemas={}, workers={})",
        ctx.registry().schema_names().len(),
        ctx.planner().workers().len()
    );

    tokio::signal::ctrl_c().await?;
    if let Some(handle) = refresh {
        handle.abort();
    }
    println!("fedgrid-gateway shutting down");
    Ok(())
}
