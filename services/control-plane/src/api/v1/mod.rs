//! API v1 routes.

mod debug;
mod jobs;
mod queue;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::routes())
        .nest("/queue-status", queue::routes())
        .nest("/debug", debug::routes())
}
