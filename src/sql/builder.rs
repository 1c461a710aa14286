//! Builds parameterized SQL over `(_id TEXT, doc JSONB)` collection tables.
//! Identifiers come from config or validated `FieldPath`s; values are always parameters.

use super::PgBindValue;
use crate::query::{CmpOp, FieldPath, Predicate, TextFn};
use crate::store::{SortKey, StoreQuery};
use serde_json::Value;

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// `'{a,b}'` text-array literal. Path segments are `[A-Za-z0-9_]+` so nothing needs escaping.
fn path_literal(path: &FieldPath) -> String {
    format!("'{{{}}}'", path.segments().join(","))
}

/// JSONB value of a field; missing fields read as JSON null.
fn field_expr(path: &FieldPath) -> String {
    if path.is_id() {
        "to_jsonb(\"_id\")".to_string()
    } else {
        format!("COALESCE(\"doc\" #> {}, 'null'::jsonb)", path_literal(path))
    }
}

fn like_pattern(func: TextFn, needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    match func {
        TextFn::Contains => format!("%{}%", escaped),
        TextFn::StartsWith => format!("{}%", escaped),
        TextFn::EndsWith => format!("%{}", escaped),
    }
}

/// Lower a predicate tree to a boolean SQL expression, pushing its literals as params.
pub fn lower_predicate(p: &Predicate, q: &mut QueryBuf) -> String {
    match p {
        Predicate::Compare { field, op, value } => {
            let lhs = field_expr(field);
            let n = q.push_param(PgBindValue::Json(value.clone()));
            match op {
                CmpOp::Eq => format!("{} = ${}", lhs, n),
                CmpOp::Ne => format!("{} <> ${}", lhs, n),
                _ => format!(
                    "(jsonb_typeof({lhs}) = jsonb_typeof(${n}) AND {lhs} {sym} ${n})",
                    lhs = lhs,
                    n = n,
                    sym = match op {
                        CmpOp::Gt => ">",
                        CmpOp::Ge => ">=",
                        CmpOp::Lt => "<",
                        _ => "<=",
                    }
                ),
            }
        }
        Predicate::Text { func, field, value } => {
            let n = q.push_param(PgBindValue::Text(like_pattern(*func, value)));
            if field.is_id() {
                format!("\"_id\" LIKE ${}", n)
            } else {
                let path = path_literal(field);
                format!(
                    "COALESCE(jsonb_typeof(\"doc\" #> {path}) = 'string' AND (\"doc\" #>> {path}) LIKE ${n}, false)",
                    path = path,
                    n = n
                )
            }
        }
        Predicate::And(l, r) => {
            let l = lower_predicate(l, q);
            let r = lower_predicate(r, q);
            format!("({} AND {})", l, r)
        }
        Predicate::Or(l, r) => {
            let l = lower_predicate(l, q);
            let r = lower_predicate(r, q);
            format!("({} OR {})", l, r)
        }
        Predicate::Not(inner) => format!("(NOT {})", lower_predicate(inner, q)),
    }
}

fn where_clause(filter: Option<&Predicate>, q: &mut QueryBuf) -> String {
    match filter {
        Some(p) => format!(" WHERE {}", lower_predicate(p, q)),
        None => String::new(),
    }
}

fn order_clause(keys: &[SortKey]) -> String {
    if keys.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = keys
        .iter()
        .map(|k| {
            let expr = if k.field.is_id() { quoted("_id") } else { field_expr(&k.field) };
            format!("{} {}", expr, if k.descending { "DESC" } else { "ASC" })
        })
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

/// SELECT `_id`, `doc` with filter, sort, limit and offset from the query.
pub fn select_docs(schema: &str, query: &StoreQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(schema, &query.collection);
    let where_sql = where_clause(query.filter.as_ref(), &mut q);
    let order_sql = order_clause(&query.effective_sort());
    let limit_sql = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_sql = query.skip.filter(|n| *n > 0).map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT \"_id\", \"doc\" FROM {}{}{}{}{}",
        table, where_sql, order_sql, limit_sql, offset_sql
    );
    q
}

pub fn count_docs(schema: &str, query: &StoreQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(schema, &query.collection);
    let where_sql = where_clause(query.filter.as_ref(), &mut q);
    q.sql = format!("SELECT COUNT(*) AS \"n\" FROM {}{}", table, where_sql);
    q
}

pub fn distinct_values(schema: &str, collection: &str, field: &FieldPath, filter: Option<&Predicate>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(schema, collection);
    let present = if field.is_id() {
        "TRUE".to_string()
    } else {
        format!("\"doc\" #> {} IS NOT NULL", path_literal(field))
    };
    let filter_sql = match filter {
        Some(p) => format!(" AND {}", lower_predicate(p, &mut q)),
        None => String::new(),
    };
    q.sql = format!(
        "SELECT DISTINCT {} AS \"v\" FROM {} WHERE {}{} ORDER BY \"v\"",
        field_expr(field),
        table,
        present,
        filter_sql
    );
    q
}

pub fn select_by_ids(schema: &str, collection: &str, ids: &[String]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(PgBindValue::TextArray(ids.to_vec()));
    q.sql = format!(
        "SELECT \"_id\", \"doc\" FROM {} WHERE \"_id\" = ANY(${})",
        qualified_table(schema, collection),
        n
    );
    q
}

pub fn insert_doc(schema: &str, collection: &str, id: &str, doc: Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.push_param(PgBindValue::Text(id.to_string()));
    q.push_param(PgBindValue::Json(doc));
    q.sql = format!(
        "INSERT INTO {} (\"_id\", \"doc\") VALUES ($1, $2)",
        qualified_table(schema, collection)
    );
    q
}

pub fn update_doc(schema: &str, collection: &str, id: &str, doc: Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.push_param(PgBindValue::Text(id.to_string()));
    q.push_param(PgBindValue::Json(doc));
    q.sql = format!(
        "UPDATE {} SET \"doc\" = $2 WHERE \"_id\" = $1",
        qualified_table(schema, collection)
    );
    q
}

pub fn delete_doc(schema: &str, collection: &str, id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.push_param(PgBindValue::Text(id.to_string()));
    q.sql = format!("DELETE FROM {} WHERE \"_id\" = $1", qualified_table(schema, collection));
    q
}

/// Name of the unique index backing `field` on `collection`.
pub fn unique_index_name(collection: &str, field: &str) -> String {
    format!("{}__{}__uniq", collection, field)
}

/// DDL creating the schema, the collection table and its unique indexes.
pub fn collection_ddl(schema: &str, collection: &str, unique: &[String]) -> Vec<String> {
    let table = qualified_table(schema, collection);
    let mut out = vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\"_id\" TEXT PRIMARY KEY, \"doc\" JSONB NOT NULL DEFAULT '{{}}'::jsonb)",
            table
        ),
    ];
    for field in unique {
        out.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ((\"doc\" -> '{}'))",
            quoted(&unique_index_name(collection, field)),
            table,
            field.replace('\'', "''")
        ));
    }
    out
}
