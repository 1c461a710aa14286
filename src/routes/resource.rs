//! Resource routes built from the registry. Each resource gets fixed paths under
//! its `rel`, decided by its node kind and allowed operations.

use crate::config::NodeKind;
use crate::handlers::resource as h;
use crate::resource::Resource;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, Path, RawQuery, State};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

type Payload = Result<Json<Value>, JsonRejection>;

fn item_routes(resource: &Resource, rel: &Arc<str>) -> MethodRouter<AppState> {
    let ops = resource.definition().operations;
    let r = rel.clone();
    let mut route = get(move |State(s): State<AppState>, Path(id): Path<String>, RawQuery(q): RawQuery| {
        h::read(s, r.clone(), id, q)
    });
    if ops.update {
        let r = rel.clone();
        let put = move |State(s): State<AppState>, Path(id): Path<String>, RawQuery(q): RawQuery, body: Payload| {
            h::update(s, r.clone(), id, q, body)
        };
        route = route.put(put.clone()).patch(put);
    }
    if ops.delete {
        let r = rel.clone();
        route = route.delete(move |State(s): State<AppState>, Path(id): Path<String>| h::delete(s, r.clone(), id));
    }
    route
}

fn create_route(rel: &Arc<str>) -> MethodRouter<AppState> {
    let r = rel.clone();
    post(move |State(s): State<AppState>, RawQuery(q): RawQuery, body: Payload| h::create(s, r.clone(), q, body))
}

fn mount(mut router: Router<AppState>, resource: &Resource) -> Router<AppState> {
    let def = resource.definition();
    let rel: Arc<str> = Arc::from(def.rel.as_str());

    let collection = match def.kind {
        NodeKind::InternalDb => {
            let r = rel.clone();
            let mut route =
                get(move |State(s): State<AppState>, RawQuery(q): RawQuery| h::find(s, r.clone(), q));
            if def.operations.create {
                let r = rel.clone();
                route = route.post(move |State(s): State<AppState>, RawQuery(q): RawQuery, body: Payload| {
                    h::create(s, r.clone(), q, body)
                });
            }
            Some(route)
        }
        NodeKind::Leaf => def.operations.create.then(|| create_route(&rel)),
        NodeKind::Root | NodeKind::Internal => {
            let r = rel.clone();
            Some(get(move |State(s): State<AppState>| h::internal_node(s, r.clone())))
        }
    };
    if let Some(route) = collection {
        router = router.route(&rel, route);
    }

    for (name, _) in resource.links().statics() {
        let r = rel.clone();
        let n: Arc<str> = Arc::from(name);
        router = router.route(
            &format!("{}/{}", rel, name),
            get(move |State(s): State<AppState>, OriginalUri(uri): OriginalUri, RawQuery(q): RawQuery| {
                h::static_link(s, r.clone(), n.clone(), uri.path().to_string(), q)
            }),
        );
    }

    if def.kind.is_backed() {
        router = router.route(&format!("{}/:id", rel), item_routes(resource, &rel));
        if resource.links().has_instances() {
            for count in [false, true] {
                let r = rel.clone();
                let path = match count {
                    true => format!("{}/:id/:link/count", rel),
                    false => format!("{}/:id/:link", rel),
                };
                router = router.route(
                    &path,
                    get(
                        move |State(s): State<AppState>,
                              Path(ids): Path<(String, String)>,
                              OriginalUri(uri): OriginalUri,
                              RawQuery(q): RawQuery| {
                            h::instance_link(s, r.clone(), ids, uri.path().to_string(), q, count)
                        },
                    ),
                );
            }
        }
    }
    tracing::debug!(rel = %rel, kind = ?def.kind, "mounted");
    router
}

/// Routes for every registered resource, with request tracing and a body size limit.
pub fn resource_routes(state: AppState, body_limit: usize) -> Router {
    let mut router = Router::new();
    for resource in state.registry.resources() {
        router = mount(router, resource);
    }
    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(body_limit)),
        )
        .with_state(state)
}
