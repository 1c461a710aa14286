//! Shared application state for all routes. Both parts are read-only after startup.

use crate::config::{ServiceConfig, StoreBackend};
use crate::error::{AppError, ConfigError};
use crate::resource::Registry;
use crate::store::{CollectionSchema, MemoryStore, PgStore, Store};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, registry: Registry) -> Self {
        AppState {
            store,
            registry: Arc::new(registry),
        }
    }
}

/// Open the configured store backend. PostgreSQL collections are created if missing.
pub async fn open_store(config: &ServiceConfig, collections: Vec<CollectionSchema>) -> Result<Arc<dyn Store>, AppError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(collections))),
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ConfigError::Validation("DATABASE_URL is required for the postgres backend".into()))?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .map_err(|e| AppError::store("database connect failed", e.into()))?;
            let store = PgStore::new(pool, &config.store_schema, collections);
            store
                .ensure_collections()
                .await
                .map_err(|e| AppError::store("collection setup failed", e))?;
            Ok(Arc::new(store))
        }
    }
}
