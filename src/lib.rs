//! OData-flavored REST resources over a document store, configured from JSON.

pub mod config;
pub mod error;
pub mod handlers;
pub mod links;
pub mod query;
pub mod resource;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{build_registry, load_resources_file, parse_resources, ResourcesFile, ServiceConfig, StoreBackend};
pub use error::{AppError, ConfigError, FilterSyntaxError, StoreError};
pub use links::{LinkContext, LinkHandler};
pub use query::{parse_filter, RequestParams};
pub use resource::{Registry, Resource};
pub use routes::{app, common_routes, common_routes_with_ready, resource_routes};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Store};
