//! Raw config types matching the resources JSON file.

use crate::store::CollectionSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Resource topology. Decides routing and the collection envelope shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    Internal,
    InternalDb,
    Leaf,
}

impl NodeKind {
    /// Kinds backed by a store collection.
    pub fn is_backed(self) -> bool {
        matches!(self, NodeKind::InternalDb | NodeKind::Leaf)
    }

    /// Kinds answered from fixed content alone.
    pub fn is_virtual(self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Internal)
    }
}

/// A string or a list of strings; `$expand` and `populate` accept both.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OneOrMany(pub Vec<String>);

impl<'de> Deserialize<'de> for OneOrMany {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(OneOrMany(Vec::new())),
            Value::String(s) => Ok(OneOrMany(vec![s])),
            Value::Array(items) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(serde::de::Error::custom(format!("expected a string path, got {}", other))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(OneOrMany),
            other => Err(serde::de::Error::custom(format!(
                "expected a string or list of strings, got {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

/// `{ "distinct": "genre" }`: sorted distinct values of a field over the filtered set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StaticLinkConfig {
    pub distinct: String,
}

/// `{ "other_side": "/api/reviews", "key": "_book" }`: members of another resource
/// whose `key` field holds this entity's id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceLinkConfig {
    pub other_side: String,
    pub key: String,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub rel: String,
    #[serde(default)]
    pub oname: Option<String>,
    #[serde(default)]
    pub otype: Option<String>,
    /// Defaults to `internal_db` when a collection is set, `internal` otherwise.
    #[serde(default)]
    pub node_type: Option<NodeKind>,
    #[serde(default)]
    pub okey: Option<String>,
    #[serde(default, alias = "model")]
    pub collection: Option<String>,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default)]
    pub count: bool,
    #[serde(default)]
    pub lean: Option<bool>,
    #[serde(default = "default_true")]
    pub create: bool,
    #[serde(default = "default_true")]
    pub update: bool,
    #[serde(default = "default_true")]
    pub delete: bool,
    /// Deprecated default for `$expand`.
    #[serde(default)]
    pub populate: OneOrMany,
    #[serde(default, rename = "$top")]
    pub top: Option<u64>,
    #[serde(default, rename = "$skip")]
    pub skip: Option<u64>,
    #[serde(default, rename = "$orderby")]
    pub orderby: Option<String>,
    #[serde(default, rename = "$orderbyPaged")]
    pub orderby_paged: Option<String>,
    #[serde(default, rename = "$select")]
    pub select: Option<String>,
    #[serde(default, rename = "$expand")]
    pub expand: OneOrMany,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
    #[serde(default)]
    pub static_links: BTreeMap<String, StaticLinkConfig>,
    #[serde(default)]
    pub instance_links: BTreeMap<String, InstanceLinkConfig>,
}

impl ResourceConfig {
    /// Declared `node_type`, or the default implied by `collection`.
    pub fn kind(&self) -> NodeKind {
        self.node_type.unwrap_or(match self.collection {
            Some(_) => NodeKind::InternalDb,
            None => NodeKind::Internal,
        })
    }
}

/// Everything a resources file declares.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResourcesFile {
    #[serde(default)]
    pub collections: Vec<CollectionSchema>,
    pub resources: Vec<ResourceConfig>,
}
