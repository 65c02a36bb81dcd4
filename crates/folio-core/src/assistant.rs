//! Chat assistant: the chatbot consumer of the local device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::chat_types::{render_transcript, ConversationMessage};
use crate::error::{Error, Result};
use crate::events::{Consumer, ModelConsumer};
use crate::loader::{GenerationOptions, LazyModelLoader, LoadStatus};
use crate::remote::RemoteGenerator;

pub const EMPTY_RESPONSE_TEXT: &str = "No response was received.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantReply {
    pub text: String,
    pub source: ResponseSource,
}

pub struct ChatAssistant {
    loader: Arc<LazyModelLoader>,
    remote: Arc<dyn RemoteGenerator>,
    options: GenerationOptions,
    active: AtomicBool,
    /// Latched on the first local failure; never cleared within a session.
    remote_only: AtomicBool,
}

impl ChatAssistant {
    pub fn new(
        loader: Arc<LazyModelLoader>,
        remote: Arc<dyn RemoteGenerator>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            loader,
            remote,
            options,
            active: AtomicBool::new(false),
            remote_only: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_remote_only(&self) -> bool {
        self.remote_only.load(Ordering::Acquire)
    }

    pub fn loader(&self) -> &LazyModelLoader {
        &self.loader
    }

    /// Answer the last user turn of `history`.
    pub async fn respond(
        &self,
        history: &[ConversationMessage],
        system_instruction: &str,
    ) -> Result<AssistantReply> {
        if history.is_empty() {
            return Err(Error::InvalidInput("conversation history is empty".to_string()));
        }

        if self.local_usable() {
            match self.respond_locally(history, system_instruction).await {
                Ok(text) => {
                    return Ok(AssistantReply {
                        text: non_empty(text),
                        source: ResponseSource::Local,
                    })
                }
                Err(err) if err.is_local_model_failure() => {
                    warn!("Local chat model failed, using remote API for this session: {err}");
                    self.remote_only.store(true, Ordering::Release);
                    self.loader.dispose();
                }
                Err(err) => return Err(err),
            }
        }

        let text = self.remote.generate(history, system_instruction).await?;
        Ok(AssistantReply {
            text: non_empty(text),
            source: ResponseSource::Remote,
        })
    }

    fn local_usable(&self) -> bool {
        self.is_active() && !self.is_remote_only() && self.loader.status() == LoadStatus::Ready
    }

    async fn respond_locally(
        &self,
        history: &[ConversationMessage],
        system_instruction: &str,
    ) -> Result<String> {
        let prompt = format!(
            "{system_instruction}\n\n{}\nAssistant:",
            render_transcript(history)
        );
        let text = self.loader.infer(&prompt, &self.options).await?;
        Ok(text.trim().to_string())
    }
}

fn non_empty(text: String) -> String {
    if text.trim().is_empty() {
        EMPTY_RESPONSE_TEXT.to_string()
    } else {
        text
    }
}

#[async_trait]
impl ModelConsumer for ChatAssistant {
    fn consumer(&self) -> Consumer {
        Consumer::Chatbot
    }

    fn claim(&self) -> u64 {
        self.active.store(true, Ordering::Release);
        self.loader.generation()
    }

    async fn warm_up(&self, generation: u64) {
        if self.is_remote_only() || !self.is_active() {
            return;
        }
        info!(generation, "Chatbot activated, warming local model");
        if let Err(err) = self.loader.ensure_loaded_for(generation).await {
            warn!("Chatbot model unavailable, using remote API for this session: {err}");
            self.remote_only.store(true, Ordering::Release);
        }
    }

    async fn dispose(&self) {
        self.active.store(false, Ordering::Release);
        self.loader.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ExecutionDevice;
    use crate::loader::test_support::ScriptedRuntime;
    use crate::loader::ModelSpec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingRemote {
        calls: AtomicUsize,
        last_instruction: Mutex<Option<String>>,
        reply: String,
    }

    #[async_trait]
    impl RemoteGenerator for RecordingRemote {
        async fn generate(
            &self,
            _history: &[ConversationMessage],
            system_instruction: &str,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_instruction.lock().expect("lock") = Some(system_instruction.to_string());
            Ok(self.reply.clone())
        }
    }

    fn assistant(runtime: Arc<ScriptedRuntime>, remote: Arc<RecordingRemote>) -> ChatAssistant {
        let loader = Arc::new(LazyModelLoader::new(
            Consumer::Chatbot,
            ModelSpec::default_chatbot(),
            ExecutionDevice::Wasm,
            runtime,
        ));
        ChatAssistant::new(loader, remote, GenerationOptions::default())
    }

    fn remote(reply: &str) -> Arc<RecordingRemote> {
        Arc::new(RecordingRemote {
            reply: reply.to_string(),
            ..RecordingRemote::default()
        })
    }

    #[tokio::test]
    async fn inactive_assistant_uses_remote() {
        let remote = remote("remote answer");
        let assistant = assistant(Arc::new(ScriptedRuntime::new()), remote.clone());

        let reply = assistant
            .respond(&[ConversationMessage::user("hi")], "persona")
            .await
            .unwrap();

        assert_eq!(reply.source, ResponseSource::Remote);
        assert_eq!(reply.text, "remote answer");
        assert_eq!(
            remote.last_instruction.lock().unwrap().as_deref(),
            Some("persona")
        );
    }

    #[tokio::test]
    async fn active_assistant_answers_locally() {
        let remote = remote("unused");
        let assistant = assistant(Arc::new(ScriptedRuntime::new()), remote.clone());
        assistant.activate().await;

        let reply = assistant
            .respond(&[ConversationMessage::user("hello")], "sys")
            .await
            .unwrap();

        assert_eq!(reply.source, ResponseSource::Local);
        assert!(reply.text.contains("hello"));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn load_failure_latches_remote_fallback() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail_session.store(true, Ordering::SeqCst);
        let remote = remote("fallback");
        let assistant = assistant(runtime.clone(), remote.clone());

        assistant.activate().await;
        assert!(assistant.is_remote_only());

        runtime.fail_session.store(false, Ordering::SeqCst);
        assistant.dispose().await;
        assistant.activate().await;

        let reply = assistant
            .respond(&[ConversationMessage::user("hi")], "sys")
            .await
            .unwrap();
        assert_eq!(reply.source, ResponseSource::Remote);
        assert_eq!(runtime.session_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quick_reactivation_still_loads_local_model() {
        let runtime = Arc::new(ScriptedRuntime {
            load_delay: Some(Duration::from_millis(50)),
            ..ScriptedRuntime::new()
        });
        let assistant = Arc::new(assistant(runtime.clone(), remote("remote")));

        let first = {
            let assistant = assistant.clone();
            tokio::spawn(async move { assistant.activate().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assistant.dispose().await;
        assistant.activate().await;
        first.await.unwrap();

        assert!(assistant.is_active());
        assert!(!assistant.is_remote_only());
        assert_eq!(assistant.loader().status(), LoadStatus::Ready);
        let reply = assistant
            .respond(&[ConversationMessage::user("hello again")], "sys")
            .await
            .unwrap();
        assert_eq!(reply.source, ResponseSource::Local);
    }

    #[tokio::test]
    async fn dispose_returns_to_remote() {
        let remote = remote("remote");
        let assistant = assistant(Arc::new(ScriptedRuntime::new()), remote);
        assistant.activate().await;
        assistant.dispose().await;

        assert!(!assistant.is_active());
        assert_eq!(assistant.loader().status(), LoadStatus::Idle);
        let reply = assistant
            .respond(&[ConversationMessage::user("hi")], "sys")
            .await
            .unwrap();
        assert_eq!(reply.source, ResponseSource::Remote);
    }

    #[tokio::test]
    async fn empty_remote_reply_is_replaced() {
        let assistant = assistant(Arc::new(ScriptedRuntime::new()), remote("   "));
        let reply = assistant
            .respond(&[ConversationMessage::user("hi")], "sys")
            .await
            .unwrap();
        assert_eq!(reply.text, EMPTY_RESPONSE_TEXT);
    }
}
