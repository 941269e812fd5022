//! Debug and introspection endpoints.
//!
//! These routes are intended for development and operator debugging.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Router};
use tracing::info;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/dump", post(request_dump))
}

/// Ask the reconciliation loop to write every scheduler's state to disk.
async fn request_dump(State(state): State<AppState>) -> impl IntoResponse {
    info!("Scheduler dump requested");
    state.handoff().request_dump();
    StatusCode::ACCEPTED
}
