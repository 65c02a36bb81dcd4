//! Chat transcript logging and review.

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/log-chat", post(handlers::log_chat))
        .route("/chats", get(handlers::list_chats))
        .route("/chats/:chat_id", get(handlers::get_chat))
}
