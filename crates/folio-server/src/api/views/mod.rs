//! Per-slug view counter.

mod handlers;

use axum::{routing::get, Router};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/views", get(handlers::get_multiple_views))
        .route(
            "/views/:slug",
            get(handlers::get_views).post(handlers::increment_view),
        )
}
