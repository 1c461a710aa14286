//! Process settings read from the environment.

use crate::error::ConfigError;
use std::path::PathBuf;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_RESOURCES_PATH: &str = "resources.json";
pub const DEFAULT_STORE_SCHEMA: &str = "odata";
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub resources_path: PathBuf,
    pub backend: StoreBackend,
    /// Required for the postgres backend.
    pub database_url: Option<String>,
    pub store_schema: String,
    pub body_limit: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StoreBackend::Memory,
            Some("postgres") => StoreBackend::Postgres,
            Some(other) => {
                return Err(ConfigError::Validation(format!(
                    "STORE_BACKEND must be 'memory' or 'postgres', got '{}'",
                    other
                )))
            }
        };
        let database_url = lookup("DATABASE_URL").filter(|s| !s.is_empty());
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Validation("DATABASE_URL is required for the postgres backend".into()));
        }
        let body_limit = match lookup("BODY_LIMIT_BYTES") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("BODY_LIMIT_BYTES is not a byte count: '{}'", raw)))?,
            None => DEFAULT_BODY_LIMIT,
        };
        Ok(ServiceConfig {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            resources_path: lookup("RESOURCES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESOURCES_PATH)),
            backend,
            database_url,
            store_schema: lookup("STORE_SCHEMA").unwrap_or_else(|| DEFAULT_STORE_SCHEMA.into()),
            body_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServiceConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(c.backend, StoreBackend::Memory);
        assert_eq!(c.store_schema, "odata");
        assert_eq!(c.body_limit, 1024 * 1024);
        assert_eq!(c.resources_path, PathBuf::from("resources.json"));
    }

    #[test]
    fn postgres_needs_a_url() {
        assert!(config(&[("STORE_BACKEND", "postgres")]).is_err());
        let c = config(&[("STORE_BACKEND", "postgres"), ("DATABASE_URL", "postgres://localhost/odata")]).unwrap();
        assert_eq!(c.backend, StoreBackend::Postgres);
        assert!(config(&[("STORE_BACKEND", "mongo")]).is_err());
        assert!(config(&[("BODY_LIMIT_BYTES", "lots")]).is_err());
    }
}
