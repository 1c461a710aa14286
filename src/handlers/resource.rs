//! HTTP handlers for resource routes. The route table binds each handler to one
//! `rel`; handlers look the resource up in the registry and delegate to it.

use crate::error::AppError;
use crate::query::RequestParams;
use crate::resource::Resource;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value;
use std::sync::Arc;

fn resource<'a>(state: &'a AppState, rel: &str) -> Result<&'a Resource, AppError> {
    state
        .registry
        .get(rel)
        .ok_or_else(|| AppError::NotFound(rel.to_string()))
}

fn params(query: Option<String>) -> RequestParams {
    RequestParams::parse(query.as_deref().unwrap_or(""))
}

fn body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    body.map(|Json(v)| v).map_err(|e| AppError::BadRequest(e.body_text()))
}

pub async fn find(state: AppState, rel: Arc<str>, query: Option<String>) -> Result<Json<Value>, AppError> {
    let r = resource(&state, &rel)?;
    Ok(Json(r.find(state.store.as_ref(), &params(query)).await?))
}

pub async fn internal_node(state: AppState, rel: Arc<str>) -> Result<Json<Value>, AppError> {
    Ok(Json(resource(&state, &rel)?.internal_node()))
}

pub async fn create(
    state: AppState,
    rel: Arc<str>,
    query: Option<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let r = resource(&state, &rel)?;
    let created = r.create(state.store.as_ref(), body(payload)?, &params(query)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn read(state: AppState, rel: Arc<str>, id: String, query: Option<String>) -> Result<Json<Value>, AppError> {
    let r = resource(&state, &rel)?;
    Ok(Json(r.find_item(state.store.as_ref(), &id, &params(query)).await?))
}

pub async fn update(
    state: AppState,
    rel: Arc<str>,
    id: String,
    query: Option<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let r = resource(&state, &rel)?;
    let updated = r.update(state.store.as_ref(), &id, body(payload)?, &params(query)).await?;
    Ok(Json(updated))
}

pub async fn delete(state: AppState, rel: Arc<str>, id: String) -> Result<StatusCode, AppError> {
    resource(&state, &rel)?.delete(state.store.as_ref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn static_link(
    state: AppState,
    rel: Arc<str>,
    name: Arc<str>,
    path: String,
    query: Option<String>,
) -> Result<Json<Value>, AppError> {
    let r = resource(&state, &rel)?;
    let out = r
        .follow_static(state.store.as_ref(), &state.registry, &name, &params(query), &path)
        .await?;
    Ok(Json(out))
}

/// `{rel}/{id}/{link}` and, with `count`, `{rel}/{id}/{link}/count`.
pub async fn instance_link(
    state: AppState,
    rel: Arc<str>,
    (id, link): (String, String),
    path: String,
    query: Option<String>,
    count: bool,
) -> Result<Json<Value>, AppError> {
    let r = resource(&state, &rel)?;
    // related collections advertise their count link relative to the link path
    let trimmed = path.trim_end_matches('/');
    let path = match count {
        true => trimmed.strip_suffix("/count").unwrap_or(trimmed),
        false => trimmed,
    };
    let out = r
        .follow_instance(state.store.as_ref(), &state.registry, &id, &link, &params(query), path, count)
        .await?;
    Ok(Json(out))
}
