//! Chat assistant context and server-side chat turns.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use folio_core::assistant::EMPTY_RESPONSE_TEXT;
use folio_core::{AssistantReply, CapabilityResult, ConversationMessage, ResponseSource};
use serde::Deserialize;
use tracing::{error, info};

use crate::agent_context::AgentContext;
use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agent-context", get(agent_context))
        .route("/chat", post(chat))
        .route("/capability", get(capability))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ConversationMessage>,
}

async fn agent_context(State(state): State<AppState>) -> Result<Json<AgentContext>, ApiError> {
    let context = state.agent_context.build().await.map_err(|err| {
        error!("Error building agent context: {err:#}");
        ApiError::internal("Error building agent context")
    })?;
    Ok(Json(context))
}

async fn chat(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<AssistantReply>, ApiError> {
    if req.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }

    let context = state.agent_context.build().await.map_err(|err| {
        error!("Error building agent context: {err:#}");
        ApiError::internal("Error building agent context")
    })?;

    let text = state
        .remote
        .generate(&req.messages, &context.system_instruction)
        .await
        .map_err(|err| {
            error!("Remote generation failed: {err}");
            ApiError::from(err)
        })?;
    info!(turns = req.messages.len(), "Chat turn answered remotely");

    let text = if text.trim().is_empty() {
        EMPTY_RESPONSE_TEXT.to_string()
    } else {
        text
    };
    Ok(Json(AssistantReply {
        text,
        source: ResponseSource::Remote,
    }))
}

async fn capability(State(state): State<AppState>) -> Json<CapabilityResult> {
    Json(state.capability.as_ref().clone())
}
