//! Queue availability endpoint.

use axum::{extract::State, routing::get, Json, Router};
use compute_events::QueueStatusSnapshot;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(queue_status))
}

/// Availability per product as of the last reconciliation tick.
async fn queue_status(State(state): State<AppState>) -> Json<QueueStatusSnapshot> {
    Json(state.queue_status())
}
