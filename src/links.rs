//! Static and instance link registry.
//!
//! Static links hang off a resource's collection path (`{rel}/{name}`); instance
//! links hang off one entity (`{rel}/{id}/{name}`). Both are registered once while
//! a resource is built and never change afterwards.

use crate::error::{AppError, ConfigError};
use crate::query::definition::FILTER;
use crate::query::{parse_filter, FieldPath, RequestParams};
use crate::resource::{Registry, Resource};
use crate::store::Store;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const COUNT_LINK: &str = "count";

/// Everything a link handler may need from the current request.
pub struct LinkContext<'a> {
    pub store: &'a dyn Store,
    pub registry: &'a Registry,
    /// Resource the link is registered on.
    pub resource: &'a Resource,
    pub params: &'a RequestParams,
    /// Request path without the query string.
    pub path: &'a str,
    /// Entity id for instance links.
    pub id: Option<&'a str>,
}

#[async_trait]
pub trait LinkHandler: Send + Sync {
    async fn handle(&self, ctx: &LinkContext<'_>) -> Result<Value, AppError>;

    /// URL advertised for this link in `_links`.
    fn href(&self, base: &str, name: &str) -> Result<String, AppError> {
        Ok(format!("{}/{}", base.trim_end_matches('/'), name))
    }

    /// Cardinality behind the link. None when the link does not lead to a countable set.
    async fn count(&self, _ctx: &LinkContext<'_>) -> Result<Option<u64>, AppError> {
        Ok(None)
    }

    /// `rel` of the resource this link leads to, if it leads to one.
    fn target(&self) -> Option<&str> {
        None
    }
}

/// Cardinality of the resource's filtered set.
pub struct CountLink;

#[async_trait]
impl LinkHandler for CountLink {
    async fn handle(&self, ctx: &LinkContext<'_>) -> Result<Value, AppError> {
        let n = ctx.resource.count(ctx.store, ctx.params).await?;
        Ok(json!(n))
    }
}

/// Sorted distinct values of one field, honoring `$filter`.
pub struct DistinctLink {
    field: FieldPath,
}

impl DistinctLink {
    pub fn new(field: FieldPath) -> Self {
        DistinctLink { field }
    }
}

#[async_trait]
impl LinkHandler for DistinctLink {
    async fn handle(&self, ctx: &LinkContext<'_>) -> Result<Value, AppError> {
        let collection = ctx.resource.collection_name()?;
        let filter = ctx.params.get(FILTER).map(parse_filter).transpose()?;
        let values = ctx
            .store
            .distinct(collection, &self.field, filter.as_ref())
            .await
            .map_err(|e| AppError::store("distinct failed", e))?;
        Ok(Value::Array(values))
    }
}

/// Members of another resource whose `key` field holds the current entity's id.
pub struct RelatedLink {
    other_side: String,
    key: FieldPath,
}

impl RelatedLink {
    pub fn new(other_side: &str, key: FieldPath) -> Self {
        RelatedLink {
            other_side: other_side.to_string(),
            key,
        }
    }
}

#[async_trait]
impl LinkHandler for RelatedLink {
    async fn handle(&self, ctx: &LinkContext<'_>) -> Result<Value, AppError> {
        let id = ctx
            .id
            .ok_or_else(|| AppError::BadRequest("instance link requires an entity id".into()))?;
        let other = ctx
            .registry
            .get(&self.other_side)
            .ok_or_else(|| AppError::NotFound(self.other_side.clone()))?;
        other.related(ctx.store, &self.key, id, ctx.params, ctx.path).await
    }

    async fn count(&self, ctx: &LinkContext<'_>) -> Result<Option<u64>, AppError> {
        let (Some(id), Some(other)) = (ctx.id, ctx.registry.get(&self.other_side)) else {
            return Ok(None);
        };
        if !other.definition().count {
            return Ok(None);
        }
        other.count_related(ctx.store, &self.key, id, ctx.params).await.map(Some)
    }

    fn target(&self) -> Option<&str> {
        Some(&self.other_side)
    }
}

/// Append-only name to handler map. Names are unique per link kind.
#[derive(Clone, Default)]
pub struct LinkRegistry {
    statics: Vec<(String, Arc<dyn LinkHandler>)>,
    instances: Vec<(String, Arc<dyn LinkHandler>)>,
}

fn check_name(rel: &str, name: &str, taken: &[(String, Arc<dyn LinkHandler>)]) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains('/') || name.starts_with(':') {
        return Err(ConfigError::Validation(format!("{}: invalid link name '{}'", rel, name)));
    }
    if taken.iter().any(|(n, _)| n == name) {
        return Err(ConfigError::DuplicateLink {
            rel: rel.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

impl LinkRegistry {
    /// Register without checks; for links the engine itself adds.
    pub(crate) fn push_static(&mut self, name: &str, handler: Arc<dyn LinkHandler>) {
        self.statics.push((name.to_string(), handler));
    }

    pub fn add_static(&mut self, rel: &str, name: &str, handler: Arc<dyn LinkHandler>) -> Result<(), ConfigError> {
        check_name(rel, name, &self.statics)?;
        self.statics.push((name.to_string(), handler));
        Ok(())
    }

    pub fn add_instance(&mut self, rel: &str, name: &str, handler: Arc<dyn LinkHandler>) -> Result<(), ConfigError> {
        check_name(rel, name, &self.instances)?;
        self.instances.push((name.to_string(), handler));
        Ok(())
    }

    pub fn static_link(&self, name: &str) -> Option<&Arc<dyn LinkHandler>> {
        self.statics.iter().find(|(n, _)| n == name).map(|(_, h)| h)
    }

    pub fn instance_link(&self, name: &str) -> Option<&Arc<dyn LinkHandler>> {
        self.instances.iter().find(|(n, _)| n == name).map(|(_, h)| h)
    }

    /// Static links in registration order.
    pub fn statics(&self) -> impl Iterator<Item = (&str, &Arc<dyn LinkHandler>)> {
        self.statics.iter().map(|(n, h)| (n.as_str(), h))
    }

    pub fn instances(&self) -> impl Iterator<Item = (&str, &Arc<dyn LinkHandler>)> {
        self.instances.iter().map(|(n, h)| (n.as_str(), h))
    }

    pub fn has_instances(&self) -> bool {
        !self.instances.is_empty()
    }
}
