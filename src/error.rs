//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate rel: {0}")]
    DuplicateRel(String),
    #[error("duplicate link '{name}' on {rel}")]
    DuplicateLink { rel: String, name: String },
    #[error("route {path} is declared by both {first} and {second}")]
    RouteConflict { path: String, first: String, second: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// A `$filter` that could not be parsed. The whole filter is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid $filter at {position} ('{clause}'): {message}")]
pub struct FilterSyntaxError {
    /// Text of the filter starting at the offending token.
    pub clause: String,
    /// Byte offset of the offending token.
    pub position: usize,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error("unknown field '{field}' in collection {collection}")]
    UnknownField { collection: String, field: String },
    #[error("'{field}' is not a reference in collection {collection}")]
    UnknownRelation { collection: String, field: String },
    #[error("duplicate value for unique field '{0}'")]
    Conflict(String),
    #[error("no document with _id {0}")]
    NotFound(String),
    #[error("operation requires a native record")]
    NotNative,
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    FilterSyntax(#[from] FilterSyntaxError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl AppError {
    /// Wrap a store failure with the operation that hit it.
    pub fn store(context: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::NotFound(id) => AppError::NotFound(id),
            source => AppError::Store { context, source },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::FilterSyntax(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Store { source, .. } => match source {
                StoreError::Conflict(_) => StatusCode::CONFLICT,
                StoreError::UnknownField { .. } | StoreError::UnknownRelation { .. } => StatusCode::BAD_REQUEST,
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::FilterSyntax(_) => "invalid $filter".into(),
            AppError::NotFound(_) => "not found".into(),
            AppError::Store { context, .. } => (*context).to_string(),
            other => other.to_string(),
        }
    }

    fn detail(&self) -> Value {
        match self {
            AppError::FilterSyntax(e) => json!({
                "clause": e.clause,
                "position": e.position,
                "message": e.message,
            }),
            AppError::Store { source, .. } => Value::String(source.to_string()),
            AppError::NotFound(id) => Value::String(id.clone()),
            _ => Value::Null,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
    pub err: Value,
}

impl From<&AppError> for ErrorBody {
    fn from(e: &AppError) -> Self {
        ErrorBody {
            status: e.status().as_u16(),
            message: e.message(),
            err: e.detail(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_409() {
        let e = AppError::store("create failure", StoreError::Conflict("email".into()));
        assert_eq!(e.status(), StatusCode::CONFLICT);
        let body = ErrorBody::from(&e);
        assert_eq!(body.status, 409);
        assert_eq!(body.message, "create failure");
    }

    #[test]
    fn store_not_found_becomes_not_found() {
        let e = AppError::store("update failure", StoreError::NotFound("abc".into()));
        assert!(matches!(e, AppError::NotFound(ref id) if id == "abc"));
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn filter_errors_carry_the_clause() {
        let e = AppError::from(FilterSyntaxError {
            clause: "and year gt 2000".into(),
            position: 9,
            message: "expected a literal".into(),
        });
        let body = ErrorBody::from(&e);
        assert_eq!(body.status, 400);
        assert_eq!(body.err["clause"], "and year gt 2000");
        assert_eq!(body.err["position"], 9);
    }
}
