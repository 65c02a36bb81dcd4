//! Wiring of the coordinator, both loaders and both consumers onto one bus.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::assistant::ChatAssistant;
use crate::capability::CapabilityResult;
use crate::coordinator::{CoordinatorConfig, CoordinatorState, ModelCoordinator};
use crate::events::{attach, Consumer, EventBus};
use crate::loader::{GenerationOptions, LazyModelLoader, ModelRuntime};
use crate::remote::RemoteGenerator;
use crate::translator::PageTranslator;

pub struct ModelStack {
    pub coordinator: Arc<ModelCoordinator>,
    pub assistant: Arc<ChatAssistant>,
    pub translator: Arc<PageTranslator>,
    listeners: Vec<JoinHandle<()>>,
}

impl ModelStack {
    /// Build the stack and subscribe both consumers. Call [`ModelStack::start`]
    /// to run the preload sequence.
    pub fn new(
        config: CoordinatorConfig,
        capability: CapabilityResult,
        runtime: Arc<dyn ModelRuntime>,
        remote: Arc<dyn RemoteGenerator>,
        locale: &str,
    ) -> Self {
        let device = capability.preferred_device();
        let bus = EventBus::new();

        let chat_loader = Arc::new(LazyModelLoader::new(
            Consumer::Chatbot,
            config.chatbot.clone(),
            device,
            Arc::clone(&runtime),
        ));
        let translate_loader = Arc::new(LazyModelLoader::new(
            Consumer::Translator,
            config.translator.clone(),
            device,
            Arc::clone(&runtime),
        ));

        let assistant = Arc::new(ChatAssistant::new(
            chat_loader,
            remote,
            GenerationOptions::default(),
        ));
        let translator = Arc::new(PageTranslator::new(translate_loader, locale));

        let listeners = vec![
            attach(&bus, Arc::clone(&assistant)),
            attach(&bus, Arc::clone(&translator)),
        ];

        let coordinator = Arc::new(ModelCoordinator::new(config, capability, runtime, bus));
        info!(device = device.as_str(), "Model stack assembled");

        Self {
            coordinator,
            assistant,
            translator,
            listeners,
        }
    }

    pub async fn start(&self) -> CoordinatorState {
        self.coordinator.start().await
    }
}

impl Drop for ModelStack {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}
