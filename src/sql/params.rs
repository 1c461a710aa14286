//! Bind values for generated PostgreSQL queries.

use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// A value bound to a `$n` placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    /// Bound as JSONB; used for every comparison against document fields.
    Json(Value),
    Text(String),
    TextArray(Vec<String>),
}

/// Bind params in placeholder order.
pub fn bind_params<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &[PgBindValue]) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = match p {
            PgBindValue::Json(v) => query.bind(sqlx::types::Json(v.clone())),
            PgBindValue::Text(s) => query.bind(s.clone()),
            PgBindValue::TextArray(a) => query.bind(a.clone()),
        };
    }
    query
}
