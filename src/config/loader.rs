//! Load the resources file and build the resource registry from it.

use crate::config::{validate, ResourceDefinition, ResourcesFile};
use crate::error::ConfigError;
use crate::links::{DistinctLink, RelatedLink};
use crate::query::FieldPath;
use crate::resource::{Registry, Resource};
use std::path::Path;

pub fn parse_resources(json: &str) -> Result<ResourcesFile, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(format!("invalid resources file: {}", e)))
}

pub fn load_resources_file(path: &Path) -> Result<ResourcesFile, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("cannot read {}: {}", path.display(), e)))?;
    parse_resources(&raw)
}

fn field(rel: &str, link: &str, raw: &str) -> Result<FieldPath, ConfigError> {
    FieldPath::parse(raw).ok_or_else(|| ConfigError::Validation(format!("{}: link '{}' has invalid field '{}'", rel, link, raw)))
}

/// Validate the file, then turn every declared resource and link into a registry entry.
pub fn build_registry(file: &ResourcesFile) -> Result<Registry, ConfigError> {
    validate(file)?;
    let mut resources = Vec::with_capacity(file.resources.len());
    for cfg in &file.resources {
        let schema = cfg
            .collection
            .as_deref()
            .and_then(|name| file.collections.iter().find(|c| c.name == name));
        let mut resource = Resource::new(ResourceDefinition::from_config(cfg, schema)?);
        for (name, link) in &cfg.static_links {
            resource = resource.static_link(name, DistinctLink::new(field(&cfg.rel, name, &link.distinct)?))?;
        }
        for (name, link) in &cfg.instance_links {
            resource = resource.instance_link(name, RelatedLink::new(&link.other_side, field(&cfg.rel, name, &link.key)?))?;
        }
        resources.push(resource);
    }
    let registry = Registry::new(resources)?;
    tracing::debug!(resources = registry.len(), "registry built");
    Ok(registry)
}
