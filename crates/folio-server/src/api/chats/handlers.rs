use axum::extract::{Path, State};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::api::request_context::RequestContext;
use crate::chat_log_store::{ChatLog, ChatSummary};
use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogChatRequest {
    #[serde(default)]
    pub messages: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogChatResponse {
    pub success: bool,
    pub log_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub chats: Vec<ChatSummary>,
}

pub async fn log_chat(
    State(state): State<AppState>,
    ctx: RequestContext,
    ApiJson(req): ApiJson<LogChatRequest>,
) -> Result<Json<LogChatResponse>, ApiError> {
    let Some(Value::Array(messages)) = req.messages else {
        return Err(ApiError::bad_request("Invalid messages format"));
    };

    let id = req
        .chat_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let timestamp = req
        .timestamp
        .filter(|ts| !ts.trim().is_empty())
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

    state
        .chats
        .save_chat(ChatLog {
            id: id.clone(),
            timestamp,
            messages,
        })
        .await
        .map_err(|err| {
            error!(chat_id = %id, correlation_id = %ctx.correlation_id, "Error logging chat: {err:#}");
            map_store_error()
        })?;

    Ok(Json(LogChatResponse {
        success: true,
        log_id: id,
    }))
}

pub async fn list_chats(State(state): State<AppState>) -> Result<Json<ChatListResponse>, ApiError> {
    let chats = state.chats.list_chats().await.map_err(|err| {
        error!("Error fetching chat list: {err:#}");
        map_store_error()
    })?;
    Ok(Json(ChatListResponse { chats }))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chat = state
        .chats
        .get_chat(&chat_id)
        .await
        .map_err(|err| {
            error!(chat_id = %chat_id, "Error fetching chat: {err:#}");
            map_store_error()
        })?
        .ok_or_else(|| ApiError::not_found("Chat not found"))?;
    Ok(Json(chat))
}

fn map_store_error() -> ApiError {
    ApiError::internal("Internal Server Error")
}
