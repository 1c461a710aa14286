pub mod common;
pub mod resource;

pub use common::{common_routes, common_routes_with_ready};
pub use resource::resource_routes;

use crate::state::AppState;
use axum::Router;

/// Resource routes merged with the common ones.
pub fn app(state: AppState, body_limit: usize) -> Router {
    common_routes_with_ready(state.clone()).merge(resource_routes(state, body_limit))
}
