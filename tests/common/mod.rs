//! In-process test client over the example resources, backed by `MemoryStore`.

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use odata_resource::{app, build_registry, parse_resources, AppState, MemoryStore};
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const RESOURCES: &str = include_str!("../../example_consumer/resources.json");

pub struct TestApp {
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let file = parse_resources(RESOURCES).expect("example resources parse");
        let registry = build_registry(&file).expect("example resources are valid");
        let store = Arc::new(MemoryStore::new(file.collections));
        TestApp {
            router: app(AppState::new(store, registry), 64 * 1024),
        }
    }

    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(v) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");
        self.dispatch(request).await
    }

    pub async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body reads").to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    /// POST and return the created entity's `_id`.
    pub async fn create(&self, uri: &str, body: Value) -> String {
        let (status, created) = self.send(Method::POST, uri, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", created);
        created["_id"].as_str().expect("created entity has an _id").to_string()
    }
}
