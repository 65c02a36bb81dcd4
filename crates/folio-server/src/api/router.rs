use axum::{extract::Request, middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

use crate::api::request_context::{attach_request_context, RequestContext};
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let correlation_id = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.correlation_id.as_str())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            correlation_id = %correlation_id
        )
    });

    let api_routes = Router::new()
        .merge(crate::api::views::router())
        .merge(crate::api::chats::router())
        .merge(crate::api::agent::router())
        .merge(crate::api::health::router());

    Router::new()
        .nest("/api", api_routes)
        .layer(trace_layer)
        .layer(middleware::from_fn(attach_request_context))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
