//! Store collaborator contract: the query builder the translator fills in, and the
//! operations a backing document store must provide.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use crate::query::{FieldPath, Predicate};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

pub const ID_FIELD: &str = "_id";

/// Declared shape of a collection.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    /// Declared top-level fields. When set, queries on other fields fail with `UnknownField`.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Reference field -> target collection, used by `$expand`.
    #[serde(default)]
    pub refs: HashMap<String, String>,
    #[serde(default)]
    pub unique: Vec<String>,
}

impl CollectionSchema {
    pub fn new(name: &str) -> Self {
        CollectionSchema {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn check_field(&self, field: &FieldPath) -> Result<(), StoreError> {
        let Some(fields) = &self.fields else { return Ok(()) };
        let root = field.root();
        if root == ID_FIELD || fields.iter().any(|f| f == root) || self.refs.contains_key(root) {
            Ok(())
        } else {
            Err(StoreError::UnknownField {
                collection: self.name.clone(),
                field: field.to_string(),
            })
        }
    }

    pub fn ref_target(&self, field: &str) -> Result<&str, StoreError> {
        self.refs.get(field).map(String::as_str).ok_or_else(|| StoreError::UnknownRelation {
            collection: self.name.clone(),
            field: field.to_string(),
        })
    }

    /// Fails on the first filter or sort field the collection does not declare.
    pub fn check_query(&self, query: &StoreQuery) -> Result<(), StoreError> {
        if let Some(filter) = &query.filter {
            for field in filter.fields() {
                self.check_field(field)?;
            }
        }
        for key in &query.sort {
            self.check_field(&key.field)?;
        }
        Ok(())
    }
}

/// Anything the response mapper can turn into a plain JSON object.
pub trait Serializable {
    fn to_plain_record(self) -> Map<String, Value>;
}

impl Serializable for Map<String, Value> {
    fn to_plain_record(self) -> Map<String, Value> {
        self
    }
}

/// A store-native document: can be saved back or removed.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub collection: String,
    /// None until first saved.
    pub id: Option<String>,
    pub fields: Map<String, Value>,
}

impl Record {
    /// An unsaved record. A `_id` key in `fields` is dropped; ids are assigned by the store.
    pub fn new(collection: &str, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_FIELD);
        Record {
            collection: collection.to_string(),
            id: None,
            fields,
        }
    }

    pub(crate) fn from_doc(collection: &str, mut doc: Map<String, Value>) -> Self {
        let id = match doc.remove(ID_FIELD) {
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => None,
        };
        Record {
            collection: collection.to_string(),
            id,
            fields: doc,
        }
    }

    /// Set a top-level field. `_id` is immutable and ignored.
    pub fn set(&mut self, key: &str, value: Value) {
        if key != ID_FIELD {
            self.fields.insert(key.to_string(), value);
        }
    }
}

impl Serializable for Record {
    fn to_plain_record(self) -> Map<String, Value> {
        let mut out = self.fields;
        if let Some(id) = self.id {
            out.insert(ID_FIELD.to_string(), Value::String(id));
        }
        out
    }
}

/// What a query returns: plain data (lean) or a native record.
#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    Plain(Map<String, Value>),
    Native(Record),
}

impl Entity {
    pub fn into_record(self) -> Result<Record, StoreError> {
        match self {
            Entity::Native(r) => Ok(r),
            Entity::Plain(_) => Err(StoreError::NotNative),
        }
    }
}

impl Serializable for Entity {
    fn to_plain_record(self) -> Map<String, Value> {
        match self {
            Entity::Plain(m) => m,
            Entity::Native(r) => r.to_plain_record(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub field: FieldPath,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: FieldPath) -> Self {
        SortKey { field, descending: false }
    }
}

/// One reference to populate, with the references to populate inside it.
#[derive(Clone, Debug, PartialEq)]
pub struct Expansion {
    pub path: String,
    pub nested: Vec<Expansion>,
}

impl Expansion {
    pub fn new(path: &str) -> Self {
        Expansion {
            path: path.to_string(),
            nested: Vec::new(),
        }
    }
}

/// Field projection. `_id` is kept unless explicitly excluded.
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    /// Parse `a,b`, `a b` or `-a -b`. Inclusion and exclusion cannot be mixed, except `-_id`.
    pub fn parse(spec: &str) -> Result<Projection, String> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for token in spec.split([',', ' ']).map(str::trim).filter(|t| !t.is_empty()) {
            let (excluded, name) = match token.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, token.strip_prefix('+').unwrap_or(token)),
            };
            match FieldPath::parse(name) {
                Some(p) if p.segments().len() == 1 => {}
                _ => return Err(format!("invalid $select field '{}'", name)),
            }
            if excluded {
                exclude.push(name.to_string());
            } else {
                include.push(name.to_string());
            }
        }
        if include.is_empty() {
            return Ok(Projection::Exclude(exclude));
        }
        if exclude.iter().any(|f| f != ID_FIELD) {
            return Err("$select cannot mix included and excluded fields".into());
        }
        if exclude.is_empty() {
            include.push(ID_FIELD.to_string());
        }
        Ok(Projection::Include(include))
    }

    pub fn apply(&self, doc: &mut Map<String, Value>) {
        match self {
            Projection::Include(keep) => doc.retain(|k, _| keep.iter().any(|f| f == k)),
            Projection::Exclude(drop) => doc.retain(|k, _| !drop.iter().any(|f| f == k)),
        }
    }
}

/// Accumulating query for one collection.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreQuery {
    pub collection: String,
    pub filter: Option<Predicate>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub projection: Option<Projection>,
    pub expand: Vec<Expansion>,
    pub lean: bool,
}

impl StoreQuery {
    pub fn find(collection: &str) -> Self {
        StoreQuery {
            collection: collection.to_string(),
            filter: None,
            sort: Vec::new(),
            limit: None,
            skip: None,
            projection: None,
            expand: Vec::new(),
            lean: true,
        }
    }

    pub fn by_id(collection: &str, id: &str) -> Self {
        let mut q = StoreQuery::find(collection);
        q.and_where(Predicate::eq(FieldPath::id(), Value::String(id.to_string())));
        q
    }

    pub fn by_key(collection: &str, key: FieldPath, value: &str) -> Self {
        let mut q = StoreQuery::find(collection);
        q.and_where(Predicate::eq(key, Value::String(value.to_string())));
        q
    }

    pub fn and_where(&mut self, predicate: Predicate) -> &mut Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.limit = Some(n);
        self
    }

    pub fn skip(&mut self, n: u64) -> &mut Self {
        self.skip = Some(n);
        self
    }

    pub fn sort(&mut self, keys: Vec<SortKey>) -> &mut Self {
        self.sort = keys;
        self
    }

    pub fn select(&mut self, projection: Projection) -> &mut Self {
        self.projection = Some(projection);
        self
    }

    pub fn populate(&mut self, expansion: Expansion) -> &mut Self {
        self.expand.push(expansion);
        self
    }

    pub fn lean(&mut self, lean: bool) -> &mut Self {
        self.lean = lean;
        self
    }

    /// Requested sort with `_id` appended as a tiebreaker so ordering is total.
    pub fn effective_sort(&self) -> Vec<SortKey> {
        let mut keys = self.sort.clone();
        if !keys.is_empty() && !keys.iter().any(|k| k.field.is_id()) {
            keys.push(SortKey::asc(FieldPath::id()));
        }
        keys
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    fn schema(&self, collection: &str) -> Result<&CollectionSchema, StoreError>;

    async fn find(&self, query: &StoreQuery) -> Result<Vec<Entity>, StoreError>;

    async fn find_one(&self, query: &StoreQuery) -> Result<Option<Entity>, StoreError> {
        let mut q = query.clone();
        q.limit(1);
        Ok(self.find(&q).await?.into_iter().next())
    }

    /// Cardinality of the filtered set; limit, skip and sort are ignored.
    async fn count(&self, query: &StoreQuery) -> Result<u64, StoreError>;

    /// Sorted distinct values of `field` over documents matching `filter`.
    async fn distinct(&self, collection: &str, field: &FieldPath, filter: Option<&Predicate>) -> Result<Vec<Value>, StoreError>;

    /// Plain documents (with `_id`) for the given ids, in no particular order.
    async fn find_by_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<Map<String, Value>>, StoreError>;

    /// Insert a new record (assigning its id) or replace an existing one.
    async fn save(&self, record: &mut Record) -> Result<(), StoreError>;

    async fn remove(&self, record: &Record) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

type ExpandFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

/// Replace reference ids with the referenced documents, recursing into nested expansions.
pub(crate) fn expand_docs<'a>(
    store: &'a dyn Store,
    collection: &'a str,
    docs: &'a mut [Map<String, Value>],
    expansions: &'a [Expansion],
) -> ExpandFuture<'a> {
    Box::pin(async move {
        if docs.is_empty() {
            return Ok(());
        }
        for expansion in expansions {
            let target = store.schema(collection)?.ref_target(&expansion.path)?.to_string();
            let mut ids: Vec<String> = Vec::new();
            let mut seen = HashSet::new();
            for doc in docs.iter() {
                let refs: Vec<&str> = match doc.get(&expansion.path) {
                    Some(Value::String(id)) => vec![id.as_str()],
                    Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
                    _ => Vec::new(),
                };
                for id in refs {
                    if seen.insert(id.to_string()) {
                        ids.push(id.to_string());
                    }
                }
            }
            if ids.is_empty() {
                continue;
            }
            let mut related = store.find_by_ids(&target, &ids).await?;
            if !expansion.nested.is_empty() {
                expand_docs(store, &target, &mut related, &expansion.nested).await?;
            }
            let by_id: HashMap<String, Map<String, Value>> = related
                .into_iter()
                .filter_map(|d| match d.get(ID_FIELD) {
                    Some(Value::String(id)) => Some((id.clone(), d)),
                    _ => None,
                })
                .collect();
            for doc in docs.iter_mut() {
                let Some(value) = doc.get_mut(&expansion.path) else { continue };
                match value {
                    Value::String(id) => {
                        *value = by_id.get(id.as_str()).cloned().map(Value::Object).unwrap_or(Value::Null);
                    }
                    Value::Array(items) => {
                        let expanded: Vec<Value> = items
                            .iter()
                            .filter_map(|item| match item {
                                Value::String(id) => by_id.get(id.as_str()).cloned().map(Value::Object),
                                other => Some(other.clone()),
                            })
                            .collect();
                        *items = expanded;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    })
}

/// Shared tail of `find`: projection, expansion, then lean/native shaping.
pub(crate) async fn finish_find(
    store: &dyn Store,
    query: &StoreQuery,
    mut docs: Vec<Map<String, Value>>,
) -> Result<Vec<Entity>, StoreError> {
    if let Some(projection) = &query.projection {
        for doc in docs.iter_mut() {
            projection.apply(doc);
        }
    }
    expand_docs(store, &query.collection, &mut docs, &query.expand).await?;
    Ok(docs
        .into_iter()
        .map(|doc| {
            if query.lean {
                Entity::Plain(doc)
            } else {
                Entity::Native(Record::from_doc(&query.collection, doc))
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn projection_parsing() {
        assert_eq!(
            Projection::parse("email,name").unwrap(),
            Projection::Include(vec!["email".into(), "name".into(), "_id".into()])
        );
        assert_eq!(Projection::parse("-password -__v").unwrap(), Projection::Exclude(vec!["password".into(), "__v".into()]));
        assert_eq!(Projection::parse("email -_id").unwrap(), Projection::Include(vec!["email".into()]));
        assert!(Projection::parse("email -password").is_err());
        assert!(Projection::parse("a.b").is_err());
    }

    #[test]
    fn projection_apply() {
        let mut doc = obj(json!({"_id": "1", "email": "a@b.c", "password": "x"}));
        Projection::parse("-password").unwrap().apply(&mut doc);
        assert_eq!(Value::Object(doc.clone()), json!({"_id": "1", "email": "a@b.c"}));
        Projection::parse("email").unwrap().apply(&mut doc);
        assert_eq!(Value::Object(doc), json!({"_id": "1", "email": "a@b.c"}));
    }

    #[test]
    fn records_keep_id_out_of_fields() {
        let r = Record::new("users", obj(json!({"_id": "forged", "email": "a"})));
        assert!(r.id.is_none());
        assert!(!r.fields.contains_key("_id"));
        let mut saved = Record::from_doc("users", obj(json!({"_id": "abc", "email": "a"})));
        saved.set("_id", json!("other"));
        assert_eq!(saved.id.as_deref(), Some("abc"));
        assert_eq!(saved.to_plain_record()["_id"], "abc");
    }

    #[test]
    fn tiebreaker_is_appended_once() {
        let mut q = StoreQuery::find("books");
        assert!(q.effective_sort().is_empty());
        q.sort(vec![SortKey::asc(FieldPath::parse("title").unwrap())]);
        let keys = q.effective_sort();
        assert_eq!(keys.len(), 2);
        assert!(keys[1].field.is_id());
        q.sort(vec![SortKey::asc(FieldPath::id())]);
        assert_eq!(q.effective_sort().len(), 1);
    }

    #[test]
    fn declared_fields_are_enforced() {
        let schema = CollectionSchema {
            name: "books".into(),
            fields: Some(vec!["title".into()]),
            ..Default::default()
        };
        assert!(schema.check_field(&FieldPath::parse("title").unwrap()).is_ok());
        assert!(schema.check_field(&FieldPath::id()).is_ok());
        assert!(matches!(
            schema.check_field(&FieldPath::parse("isbn").unwrap()),
            Err(StoreError::UnknownField { .. })
        ));
        assert!(CollectionSchema::new("open").check_field(&FieldPath::parse("anything").unwrap()).is_ok());
    }
}
