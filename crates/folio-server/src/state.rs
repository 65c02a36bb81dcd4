//! Shared application state.

use std::sync::Arc;

use folio_core::{
    probe, CapabilityResult, GeminiClient, ProbeThresholds, RemoteGenerator, RuntimeHints,
};

use crate::agent_context::AgentContextService;
use crate::chat_log_store::ChatLogStore;
use crate::config::ServerConfig;
use crate::github::GitHubClient;
use crate::kv_store::KvStore;
use crate::view_store::ViewStore;

#[derive(Clone)]
pub struct AppState {
    pub views: Arc<ViewStore>,
    pub chats: Arc<ChatLogStore>,
    pub agent_context: Arc<AgentContextService>,
    /// Hosted model used for server-side chat turns.
    pub remote: Arc<dyn RemoteGenerator>,
    /// Local-inference verdict for this host, computed once at startup.
    pub capability: Arc<CapabilityResult>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let kv = Arc::new(KvStore::initialize(config.db_path.clone())?);
        let repositories = Arc::new(GitHubClient::new(config.github.clone())?);
        let remote = Arc::new(GeminiClient::new(config.remote.clone())?);
        let capability = probe(
            &RuntimeHints::detect(config.gpu_compute),
            &ProbeThresholds::default(),
        );

        Ok(Self {
            views: Arc::new(ViewStore::new(
                Arc::clone(&kv),
                config.view_dedup_window,
                config.view_retry,
            )),
            chats: Arc::new(ChatLogStore::new(kv)),
            agent_context: Arc::new(AgentContextService::new(
                config.persona_path.clone(),
                config.profile_path.clone(),
                repositories,
            )),
            remote,
            capability: Arc::new(capability),
        })
    }
}
