//! Chat transcripts logged by the chat widget.
//!
//! Each chat is stored as an opaque JSON blob under `chat:{id}`, indexed in
//! the `chat_index` set, with a `chat_meta:{id}` hash for listings.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::kv_store::{self, KvStore};

const CHAT_INDEX_KEY: &str = "chat_index";
const PREVIEW_CHARS: usize = 50;
const EMPTY_PREVIEW: &str = "Empty";

fn chat_key(id: &str) -> String {
    format!("chat:{id}")
}

fn meta_key(id: &str) -> String {
    format!("chat_meta:{id}")
}

/// The stored blob. `messages` are kept exactly as the client sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLog {
    pub id: String,
    pub timestamp: String,
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSummary {
    pub id: String,
    pub timestamp: Option<String>,
    pub preview: Option<String>,
}

#[derive(Clone)]
pub struct ChatLogStore {
    kv: Arc<KvStore>,
}

impl ChatLogStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Overwrite the chat's blob and refresh its listing metadata.
    pub async fn save_chat(&self, chat: ChatLog) -> anyhow::Result<()> {
        self.save_chat_at(chat, Utc::now()).await
    }

    async fn save_chat_at(&self, chat: ChatLog, saved_at: DateTime<Utc>) -> anyhow::Result<()> {
        let id = chat.id.clone();
        let blob = serde_json::to_string(&chat).context("Failed to serialize chat log")?;
        let meta = vec![
            (
                "timestamp".to_string(),
                saved_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            ("preview".to_string(), preview_for(&chat.messages)),
        ];

        self.kv
            .transaction(move |conn| {
                kv_store::set(conn, &chat_key(&id), &blob)?;
                kv_store::sadd(conn, CHAT_INDEX_KEY, &id)?;
                kv_store::hset(conn, &meta_key(&id), &meta)?;
                Ok(())
            })
            .await?;

        info!(chat_id = %chat.id, messages = chat.messages.len(), "Chat logged");
        Ok(())
    }

    pub async fn get_chat(&self, id: &str) -> anyhow::Result<Option<Value>> {
        let Some(raw) = self.kv.get(chat_key(id)).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("Stored chat {id} is not valid JSON"))?;
        Ok(Some(value))
    }

    /// All logged chats, newest first.
    pub async fn list_chats(&self) -> anyhow::Result<Vec<ChatSummary>> {
        let mut chats = self
            .kv
            .transaction(|conn| {
                let ids = kv_store::smembers(conn, CHAT_INDEX_KEY)?;
                let mut chats = Vec::with_capacity(ids.len());
                for id in ids {
                    let mut meta = kv_store::hgetall(conn, &meta_key(&id))?;
                    chats.push(ChatSummary {
                        timestamp: meta.remove("timestamp"),
                        preview: meta.remove("preview"),
                        id,
                    });
                }
                Ok(chats)
            })
            .await?;

        chats.sort_by_key(|chat| std::cmp::Reverse(sort_millis(chat.timestamp.as_deref())));
        Ok(chats)
    }
}

/// First characters of the last message's content.
fn preview_for(messages: &[Value]) -> String {
    messages
        .last()
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(|content| content.chars().take(PREVIEW_CHARS).collect())
        .unwrap_or_else(|| EMPTY_PREVIEW.to_string())
}

fn sort_millis(timestamp: Option<&str>) -> i64 {
    timestamp
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.timestamp_millis())
        .unwrap_or(0)
}
