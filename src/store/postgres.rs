//! PostgreSQL document store: one `(_id TEXT, doc JSONB)` table per collection.

use super::{finish_find, new_id, CollectionSchema, Entity, Record, Store, StoreQuery, ID_FIELD};
use crate::error::StoreError;
use crate::query::{FieldPath, Predicate};
use crate::sql::{
    bind_params, collection_ddl, count_docs, delete_doc, distinct_values, insert_doc, select_by_ids, select_docs,
    unique_index_name, update_doc, QueryBuf,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

pub struct PgStore {
    pool: PgPool,
    schema_name: String,
    collections: HashMap<String, CollectionSchema>,
}

impl PgStore {
    pub fn new(pool: PgPool, schema_name: &str, collections: Vec<CollectionSchema>) -> Self {
        PgStore {
            pool,
            schema_name: schema_name.to_string(),
            collections: collections.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// Create the schema, collection tables and unique indexes if missing.
    pub async fn ensure_collections(&self) -> Result<(), StoreError> {
        for c in self.collections.values() {
            for ddl in collection_ddl(&self.schema_name, &c.name, &c.unique) {
                tracing::debug!(sql = %ddl, "ddl");
                sqlx::query(&ddl).execute(&self.pool).await?;
            }
        }
        tracing::info!(schema = %self.schema_name, collections = self.collections.len(), "collections ready");
        Ok(())
    }

    /// Map a unique violation back to the field it guards.
    fn map_write_error(&self, collection: &str, err: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                let field = self
                    .collections
                    .get(collection)
                    .and_then(|c| {
                        c.unique
                            .iter()
                            .find(|f| db.constraint() == Some(unique_index_name(collection, f).as_str()))
                    })
                    .cloned()
                    .unwrap_or_else(|| db.constraint().unwrap_or("unknown").to_string());
                return StoreError::Conflict(field);
            }
        }
        StoreError::Database(err)
    }

    async fn fetch_docs(&self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_params(sqlx::query(&q.sql), &q.params).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_doc).collect()
    }

    async fn execute(&self, collection: &str, q: &QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %q.sql, "execute");
        let done = bind_params(sqlx::query(&q.sql), &q.params)
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_write_error(collection, e))?;
        Ok(done.rows_affected())
    }
}

fn row_to_doc(row: &PgRow) -> Result<Map<String, Value>, StoreError> {
    let id: String = row.try_get("_id")?;
    let doc: Value = row.try_get("doc")?;
    let mut map = match doc {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    map.insert(ID_FIELD.to_string(), Value::String(id));
    Ok(map)
}

#[async_trait]
impl Store for PgStore {
    fn schema(&self, collection: &str) -> Result<&CollectionSchema, StoreError> {
        self.collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    async fn find(&self, query: &StoreQuery) -> Result<Vec<Entity>, StoreError> {
        self.schema(&query.collection)?.check_query(query)?;
        let q = select_docs(&self.schema_name, query);
        let docs = self.fetch_docs(&q).await?;
        finish_find(self, query, docs).await
    }

    async fn count(&self, query: &StoreQuery) -> Result<u64, StoreError> {
        self.schema(&query.collection)?.check_query(query)?;
        let q = count_docs(&self.schema_name, query);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_params(sqlx::query(&q.sql), &q.params).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    async fn distinct(&self, collection: &str, field: &FieldPath, filter: Option<&Predicate>) -> Result<Vec<Value>, StoreError> {
        let schema = self.schema(collection)?;
        schema.check_field(field)?;
        if let Some(p) = filter {
            for f in p.fields() {
                schema.check_field(f)?;
            }
        }
        let q = distinct_values(&self.schema_name, collection, field, filter);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_params(sqlx::query(&q.sql), &q.params).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<Value, _>("v").map_err(StoreError::from))
            .collect()
    }

    async fn find_by_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<Map<String, Value>>, StoreError> {
        self.schema(collection)?;
        self.fetch_docs(&select_by_ids(&self.schema_name, collection, ids)).await
    }

    async fn save(&self, record: &mut Record) -> Result<(), StoreError> {
        self.schema(&record.collection)?;
        let doc = Value::Object(record.fields.clone());
        match record.id.clone() {
            None => {
                let id = new_id();
                let q = insert_doc(&self.schema_name, &record.collection, &id, doc);
                self.execute(&record.collection, &q).await?;
                record.id = Some(id);
            }
            Some(id) => {
                let q = update_doc(&self.schema_name, &record.collection, &id, doc);
                if self.execute(&record.collection, &q).await? == 0 {
                    return Err(StoreError::NotFound(id));
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, record: &Record) -> Result<(), StoreError> {
        let id = record.id.as_deref().ok_or(StoreError::NotNative)?;
        let q = delete_doc(&self.schema_name, &record.collection, id);
        if self.execute(&record.collection, &q).await? == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}
