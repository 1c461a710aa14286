//! Example consumer: serves the resources declared in a JSON file.
//!
//! Run from repo root: `RESOURCES_PATH=example_consumer/resources.json cargo run -p example-consumer`
//! Set `STORE_BACKEND=postgres` and `DATABASE_URL` to use PostgreSQL instead of memory.

use odata_resource::state::open_store;
use odata_resource::{app, build_registry, load_resources_file, AppState, ServiceConfig};
use serde_json::{Map, Value};
use tokio::net::TcpListener;

const ACCOUNTS_REL: &str = "/redfish/v1/AccountService/Accounts";

/// Passwords are stored but never answered.
fn mask_password(mut entity: Map<String, Value>, _index: usize) -> Value {
    entity.remove("password");
    Value::Object(entity)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("odata_resource=info,example_consumer=info")),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let file = load_resources_file(&config.resources_path)?;
    let mut registry = build_registry(&file)?;
    if registry.get(ACCOUNTS_REL).is_some() {
        registry = registry.with_post_process(ACCOUNTS_REL, mask_password)?;
    }
    let store = open_store(&config, file.collections).await?;
    let state = AppState::new(store, registry);
    tracing::info!(resources = state.registry.len(), backend = ?config.backend, "resources loaded");

    let router = app(state, config.body_limit);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
