//! In-process document store. Used by tests and the `memory` backend.

use super::{finish_find, new_id, CollectionSchema, Entity, Record, Store, StoreQuery, ID_FIELD};
use crate::error::StoreError;
use crate::query::{compare_json, FieldPath, Predicate};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

/// Documents in insertion order, each stored with its `_id` field.
type Collection = Vec<Map<String, Value>>;

pub struct MemoryStore {
    schemas: HashMap<String, CollectionSchema>,
    data: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new(schemas: Vec<CollectionSchema>) -> Self {
        let data = schemas.iter().map(|s| (s.name.clone(), Vec::new())).collect();
        MemoryStore {
            schemas: schemas.into_iter().map(|s| (s.name.clone(), s)).collect(),
            data: RwLock::new(data),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn matching(&self, collection: &str, filter: Option<&Predicate>) -> Result<Vec<Map<String, Value>>, StoreError> {
        let data = self.read();
        let docs = data
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        Ok(docs
            .iter()
            .filter(|d| filter.map(|p| p.matches(d)).unwrap_or(true))
            .cloned()
            .collect())
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    compare_json(a, b) == Ordering::Equal
}

#[async_trait]
impl Store for MemoryStore {
    fn schema(&self, collection: &str) -> Result<&CollectionSchema, StoreError> {
        self.schemas
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    async fn find(&self, query: &StoreQuery) -> Result<Vec<Entity>, StoreError> {
        self.schema(&query.collection)?.check_query(query)?;
        let mut docs = self.matching(&query.collection, query.filter.as_ref())?;
        let keys = query.effective_sort();
        if !keys.is_empty() {
            docs.sort_by(|a, b| {
                for key in &keys {
                    let l = key.field.lookup(a).unwrap_or(&Value::Null);
                    let r = key.field.lookup(b).unwrap_or(&Value::Null);
                    let o = compare_json(l, r);
                    let o = if key.descending { o.reverse() } else { o };
                    if o != Ordering::Equal {
                        return o;
                    }
                }
                Ordering::Equal
            });
        }
        let skip = query.skip.unwrap_or(0) as usize;
        let limit = query.limit.map(|n| n as usize).unwrap_or(usize::MAX);
        let docs: Vec<_> = docs.into_iter().skip(skip).take(limit).collect();
        finish_find(self, query, docs).await
    }

    async fn count(&self, query: &StoreQuery) -> Result<u64, StoreError> {
        self.schema(&query.collection)?.check_query(query)?;
        Ok(self.matching(&query.collection, query.filter.as_ref())?.len() as u64)
    }

    async fn distinct(&self, collection: &str, field: &FieldPath, filter: Option<&Predicate>) -> Result<Vec<Value>, StoreError> {
        let schema = self.schema(collection)?;
        schema.check_field(field)?;
        if let Some(p) = filter {
            for f in p.fields() {
                schema.check_field(f)?;
            }
        }
        let mut out: Vec<Value> = Vec::new();
        for doc in self.matching(collection, filter)? {
            if let Some(v) = field.lookup(&doc) {
                if !out.iter().any(|seen| equal(seen, v)) {
                    out.push(v.clone());
                }
            }
        }
        out.sort_by(compare_json);
        Ok(out)
    }

    async fn find_by_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<Map<String, Value>>, StoreError> {
        let data = self.read();
        let docs = data
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        Ok(docs
            .iter()
            .filter(|d| matches!(d.get(ID_FIELD), Some(Value::String(id)) if ids.contains(id)))
            .cloned()
            .collect())
    }

    async fn save(&self, record: &mut Record) -> Result<(), StoreError> {
        let schema = self.schema(&record.collection)?;
        let mut data = self.write();
        let docs = data
            .get_mut(&record.collection)
            .ok_or_else(|| StoreError::UnknownCollection(record.collection.clone()))?;
        let own_id = record.id.clone();
        for field in &schema.unique {
            let Some(value) = record.fields.get(field).filter(|v| !v.is_null()) else { continue };
            let taken = docs.iter().any(|d| {
                let other_id = d.get(ID_FIELD).and_then(Value::as_str);
                other_id != own_id.as_deref() && d.get(field).map(|v| equal(v, value)).unwrap_or(false)
            });
            if taken {
                return Err(StoreError::Conflict(field.clone()));
            }
        }
        match &record.id {
            None => {
                let id = new_id();
                let mut doc = record.fields.clone();
                doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                docs.push(doc);
                record.id = Some(id);
            }
            Some(id) => {
                let slot = docs
                    .iter_mut()
                    .find(|d| d.get(ID_FIELD).and_then(Value::as_str) == Some(id.as_str()))
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                let mut doc = record.fields.clone();
                doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                *slot = doc;
            }
        }
        Ok(())
    }

    async fn remove(&self, record: &Record) -> Result<(), StoreError> {
        let id = record.id.as_deref().ok_or(StoreError::NotNative)?;
        let mut data = self.write();
        let docs = data
            .get_mut(&record.collection)
            .ok_or_else(|| StoreError::UnknownCollection(record.collection.clone()))?;
        let before = docs.len();
        docs.retain(|d| d.get(ID_FIELD).and_then(Value::as_str) != Some(id));
        if docs.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
