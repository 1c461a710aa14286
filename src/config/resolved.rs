//! Resolved resource definition: config validated and flattened for runtime use.

use crate::config::{NodeKind, ResourceConfig};
use crate::error::ConfigError;
use crate::query::{FieldPath, QueryDefaults};
use crate::service::BodyRules;
use crate::store::CollectionSchema;
use serde_json::{Map, Value};

/// Verbs a backed resource accepts besides reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operations {
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl Default for Operations {
    fn default() -> Self {
        Operations {
            create: true,
            update: true,
            delete: true,
        }
    }
}

/// Immutable description of one resource.
#[derive(Clone, Debug)]
pub struct ResourceDefinition {
    pub rel: String,
    pub oname: String,
    pub otype: String,
    pub kind: NodeKind,
    /// External key. None means entities are identified by `_id`.
    pub okey: Option<FieldPath>,
    pub collection: Option<String>,
    /// Fixed content merged into every response.
    pub content: Map<String, Value>,
    pub count: bool,
    pub defaults: QueryDefaults,
    pub operations: Operations,
    pub validation: BodyRules,
}

impl ResourceDefinition {
    /// A collection-backed (`internal_db`) resource with default behavior.
    pub fn collection(rel: &str, collection: &str) -> Self {
        ResourceDefinition {
            rel: rel.to_string(),
            oname: default_oname(rel),
            otype: default_oname(rel),
            kind: NodeKind::InternalDb,
            okey: None,
            collection: Some(collection.to_string()),
            content: Map::new(),
            count: false,
            defaults: QueryDefaults::default(),
            operations: Operations::default(),
            validation: BodyRules::default(),
        }
    }

    /// A virtual node answered purely from `content`.
    pub fn virtual_node(rel: &str, kind: NodeKind, content: Map<String, Value>) -> Self {
        ResourceDefinition {
            kind,
            collection: None,
            content,
            ..ResourceDefinition::collection(rel, "")
        }
    }

    /// `schema` is the backing collection's declaration, when the file has one.
    pub fn from_config(cfg: &ResourceConfig, schema: Option<&CollectionSchema>) -> Result<Self, ConfigError> {
        let kind = cfg.kind();
        let okey = match cfg.okey.as_deref() {
            Some(k) => Some(
                FieldPath::parse(k).ok_or_else(|| ConfigError::Validation(format!("{}: invalid okey '{}'", cfg.rel, k)))?,
            ),
            None => None,
        };
        let oname = cfg.oname.clone().unwrap_or_else(|| default_oname(&cfg.rel));
        Ok(ResourceDefinition {
            rel: cfg.rel.clone(),
            otype: cfg.otype.clone().unwrap_or_else(|| oname.clone()),
            oname,
            kind,
            okey,
            collection: cfg.collection.clone(),
            content: cfg.content.clone(),
            count: cfg.count,
            defaults: QueryDefaults {
                top: cfg.top,
                skip: cfg.skip,
                orderby: cfg.orderby.clone(),
                orderby_paged: cfg.orderby_paged.clone(),
                select: cfg.select.clone(),
                expand: cfg.expand.0.clone(),
                populate: cfg.populate.0.clone(),
                lean: cfg.lean,
            },
            operations: Operations {
                create: cfg.create,
                update: cfg.update,
                delete: cfg.delete,
            },
            validation: BodyRules::compile(&cfg.rel, &cfg.validation, schema.and_then(|c| c.fields.as_deref()))?,
        })
    }

    /// Field that identifies an entity in URLs.
    pub fn key_field(&self) -> FieldPath {
        self.okey.clone().unwrap_or_else(FieldPath::id)
    }
}

/// Last path segment of `rel`.
fn default_oname(rel: &str) -> String {
    rel.trim_end_matches('/').rsplit('/').next().unwrap_or(rel).to_string()
}
