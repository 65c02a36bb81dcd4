//! Session-scoped arbiter for the local inference device.
//!
//! At most one consumer holds the device. A switch publishes `Dispose` for the
//! current holder, waits the grace period, then publishes `Activate` for the
//! target. Release is advisory: consumers are trusted to act on `Dispose`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capability::CapabilityResult;
use crate::error::Result;
use crate::events::{Consumer, CoordinatorEvent, EventBus};
use crate::loader::{ModelRuntime, ModelSpec};

pub const DEFAULT_SWITCH_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveConsumer {
    None,
    Preloading,
    Translator,
    Chatbot,
}

impl ActiveConsumer {
    fn holder(self) -> Option<Consumer> {
        match self {
            Self::Translator => Some(Consumer::Translator),
            Self::Chatbot => Some(Consumer::Chatbot),
            Self::None | Self::Preloading => None,
        }
    }
}

impl From<Consumer> for ActiveConsumer {
    fn from(consumer: Consumer) -> Self {
        match consumer {
            Consumer::Translator => Self::Translator,
            Consumer::Chatbot => Self::Chatbot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorState {
    pub active_consumer: ActiveConsumer,
    pub has_sufficient_resources: bool,
    pub preload_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// When false the session is remote-only regardless of hardware.
    pub local_models_enabled: bool,
    pub switch_grace: Duration,
    pub translator: ModelSpec,
    pub chatbot: ModelSpec,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            local_models_enabled: true,
            switch_grace: DEFAULT_SWITCH_GRACE,
            translator: ModelSpec::default_translator(),
            chatbot: ModelSpec::default_chatbot(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched {
        from: Option<Consumer>,
        to: Consumer,
    },
    AlreadyActive,
    /// Local models are unavailable this session; use the remote API.
    RemoteOnly,
}

pub struct ModelCoordinator {
    config: CoordinatorConfig,
    capability: CapabilityResult,
    runtime: Arc<dyn ModelRuntime>,
    bus: EventBus,
    state: RwLock<CoordinatorState>,
    /// Serialises transitions so dispose/activate pairs never interleave.
    transition: Mutex<()>,
    started: AtomicBool,
}

impl ModelCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        capability: CapabilityResult,
        runtime: Arc<dyn ModelRuntime>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            capability,
            runtime,
            bus,
            state: RwLock::new(CoordinatorState {
                active_consumer: ActiveConsumer::None,
                has_sufficient_resources: false,
                preload_complete: false,
            }),
            transition: Mutex::new(()),
            started: AtomicBool::new(false),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn capability(&self) -> &CapabilityResult {
        &self.capability
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.bus.subscribe()
    }

    pub async fn state(&self) -> CoordinatorState {
        *self.state.read().await
    }

    /// Whether callers should go to the remote API instead of a local model.
    pub async fn is_remote_only(&self) -> bool {
        !self.state.read().await.has_sufficient_resources
    }

    pub fn spawn_start(self: &Arc<Self>) -> JoinHandle<CoordinatorState> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.start().await })
    }

    /// Run the one-time `none -> preloading -> translator` sequence.
    ///
    /// Later calls return the current state without side effects.
    pub async fn start(&self) -> CoordinatorState {
        if self.started.swap(true, Ordering::AcqRel) {
            return self.state().await;
        }

        if !self.config.local_models_enabled {
            self.downgrade("Local models are disabled").await;
            return self.state().await;
        }
        if !self.capability.compatible {
            let reason = self
                .capability
                .reason
                .clone()
                .unwrap_or_else(|| "Runtime is not compatible".to_string());
            self.downgrade(&reason).await;
            return self.state().await;
        }

        {
            let _transition = self.transition.lock().await;
            let mut state = self.state.write().await;
            state.has_sufficient_resources = true;
            state.active_consumer = ActiveConsumer::Preloading;
        }
        info!(
            memory_gb = self.capability.approximate_memory_gb,
            "Sufficient resources, preloading local model assets"
        );
        self.bus.publish(CoordinatorEvent::PreloadStarted);

        match self.preload().await {
            Ok(()) => self.finish_preload().await,
            Err(err) => {
                warn!("Model preload failed, falling back to remote API: {err}");
                self.downgrade(&format!("Preload failed: {err}")).await;
            }
        }

        self.state().await
    }

    async fn preload(&self) -> Result<()> {
        let (translator, chatbot) = futures::future::try_join(
            self.runtime.fetch_tokenizer(&self.config.translator),
            self.runtime.fetch_tokenizer(&self.config.chatbot),
        )
        .await?;
        // Only the cached download matters here; sessions are created lazily.
        drop((translator, chatbot));
        Ok(())
    }

    async fn finish_preload(&self) {
        let _transition = self.transition.lock().await;
        let activate = {
            let mut state = self.state.write().await;
            state.preload_complete = true;
            if state.active_consumer == ActiveConsumer::Preloading {
                state.active_consumer = ActiveConsumer::Translator;
                true
            } else {
                false
            }
        };

        info!("Preload complete");
        self.bus.publish(CoordinatorEvent::PreloadComplete);
        if activate {
            self.bus
                .publish(CoordinatorEvent::Activate(Consumer::Translator));
        }
    }

    /// Permanently fall back to remote generation for this session.
    async fn downgrade(&self, reason: &str) {
        let _transition = self.transition.lock().await;
        let previous = {
            let mut state = self.state.write().await;
            let previous = state.active_consumer.holder();
            state.active_consumer = ActiveConsumer::None;
            state.has_sufficient_resources = false;
            previous
        };

        if let Some(previous) = previous {
            self.bus.publish(CoordinatorEvent::Dispose(previous));
        }
        info!(reason, "Using remote API only for this session");
        self.bus.publish(CoordinatorEvent::Downgraded {
            reason: reason.to_string(),
        });
    }

    /// Hand the local device to `target`.
    pub async fn request_switch(&self, target: Consumer) -> SwitchOutcome {
        let _transition = self.transition.lock().await;

        let previous = {
            let mut state = self.state.write().await;
            if !state.has_sufficient_resources {
                info!(target = %target, "Switch ignored, session is remote-only");
                return SwitchOutcome::RemoteOnly;
            }
            if state.active_consumer == ActiveConsumer::from(target) {
                return SwitchOutcome::AlreadyActive;
            }
            let previous = state.active_consumer.holder();
            state.active_consumer = target.into();
            previous
        };

        info!(
            from = previous.map(Consumer::as_str).unwrap_or("none"),
            to = %target,
            "Switching local model"
        );

        if let Some(previous) = previous {
            self.bus.publish(CoordinatorEvent::Dispose(previous));
            tokio::time::sleep(self.config.switch_grace).await;
        }
        self.bus.publish(CoordinatorEvent::Activate(target));

        SwitchOutcome::Switched {
            from: previous,
            to: target,
        }
    }

    pub async fn request_switch_to_chatbot(&self) -> SwitchOutcome {
        self.request_switch(Consumer::Chatbot).await
    }

    pub async fn request_switch_to_translator(&self) -> SwitchOutcome {
        self.request_switch(Consumer::Translator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{probe, ProbeThresholds, RuntimeHints};
    use crate::loader::test_support::ScriptedRuntime;

    fn capability(memory_gb: f64) -> CapabilityResult {
        probe(
            &RuntimeHints {
                device_memory_gb: Some(memory_gb),
                gpu_compute: true,
                shared_memory: true,
                wasm_runtime: true,
            },
            &ProbeThresholds::default(),
        )
    }

    fn coordinator(
        memory_gb: f64,
        runtime: Arc<ScriptedRuntime>,
        config: CoordinatorConfig,
    ) -> Arc<ModelCoordinator> {
        Arc::new(ModelCoordinator::new(
            config,
            capability(memory_gb),
            runtime,
            EventBus::new(),
        ))
    }

    fn drain(rx: &mut broadcast::Receiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn preload_activates_translator() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(8.0, runtime.clone(), CoordinatorConfig::default());
        let mut rx = coordinator.subscribe();

        let state = coordinator.start().await;

        assert_eq!(state.active_consumer, ActiveConsumer::Translator);
        assert!(state.has_sufficient_resources);
        assert!(state.preload_complete);
        assert_eq!(runtime.tokenizer_fetches.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.session_loads.load(Ordering::SeqCst), 0);
        assert_eq!(
            drain(&mut rx),
            vec![
                CoordinatorEvent::PreloadStarted,
                CoordinatorEvent::PreloadComplete,
                CoordinatorEvent::Activate(Consumer::Translator),
            ]
        );
    }

    #[tokio::test]
    async fn start_runs_only_once() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(8.0, runtime.clone(), CoordinatorConfig::default());

        coordinator.start().await;
        coordinator.start().await;

        assert_eq!(runtime.tokenizer_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn insufficient_memory_stays_remote_only() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(2.0, runtime.clone(), CoordinatorConfig::default());

        let state = coordinator.start().await;

        assert_eq!(state.active_consumer, ActiveConsumer::None);
        assert!(!state.has_sufficient_resources);
        assert_eq!(runtime.tokenizer_fetches.load(Ordering::SeqCst), 0);
        assert_eq!(
            coordinator.request_switch_to_chatbot().await,
            SwitchOutcome::RemoteOnly
        );
    }

    #[tokio::test]
    async fn disabled_local_models_never_preload() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let config = CoordinatorConfig {
            local_models_enabled: false,
            ..CoordinatorConfig::default()
        };
        let coordinator = coordinator(16.0, runtime.clone(), config);
        let mut rx = coordinator.subscribe();

        coordinator.start().await;

        assert!(coordinator.is_remote_only().await);
        assert_eq!(runtime.tokenizer_fetches.load(Ordering::SeqCst), 0);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [CoordinatorEvent::Downgraded { .. }]
        ));
    }

    #[tokio::test]
    async fn preload_failure_downgrades_permanently() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail_tokenizer.store(true, Ordering::SeqCst);
        let coordinator = coordinator(8.0, runtime, CoordinatorConfig::default());
        let mut rx = coordinator.subscribe();

        let state = coordinator.start().await;

        assert_eq!(state.active_consumer, ActiveConsumer::None);
        assert!(!state.has_sufficient_resources);
        assert!(!state.preload_complete);
        let events = drain(&mut rx);
        assert_eq!(events[0], CoordinatorEvent::PreloadStarted);
        assert!(matches!(
            events.last(),
            Some(CoordinatorEvent::Downgraded { reason }) if reason.contains("Preload failed")
        ));
        assert_eq!(
            coordinator.request_switch_to_translator().await,
            SwitchOutcome::RemoteOnly
        );
    }

    #[tokio::test(start_paused = true)]
    async fn switch_disposes_previous_before_activating_target() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(8.0, runtime, CoordinatorConfig::default());
        coordinator.start().await;
        let mut rx = coordinator.subscribe();

        let started = tokio::time::Instant::now();
        let outcome = coordinator.request_switch_to_chatbot().await;

        assert_eq!(
            outcome,
            SwitchOutcome::Switched {
                from: Some(Consumer::Translator),
                to: Consumer::Chatbot,
            }
        );
        assert!(started.elapsed() >= DEFAULT_SWITCH_GRACE);
        assert_eq!(
            drain(&mut rx),
            vec![
                CoordinatorEvent::Dispose(Consumer::Translator),
                CoordinatorEvent::Activate(Consumer::Chatbot),
            ]
        );
        assert_eq!(
            coordinator.state().await.active_consumer,
            ActiveConsumer::Chatbot
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_switches_do_not_interleave() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(8.0, runtime, CoordinatorConfig::default());
        coordinator.start().await;
        let mut rx = coordinator.subscribe();

        let (first, second) = tokio::join!(
            coordinator.request_switch_to_chatbot(),
            coordinator.request_switch_to_translator()
        );

        assert!(matches!(first, SwitchOutcome::Switched { .. }));
        assert!(matches!(second, SwitchOutcome::Switched { .. }));
        assert_eq!(
            drain(&mut rx),
            vec![
                CoordinatorEvent::Dispose(Consumer::Translator),
                CoordinatorEvent::Activate(Consumer::Chatbot),
                CoordinatorEvent::Dispose(Consumer::Chatbot),
                CoordinatorEvent::Activate(Consumer::Translator),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn switch_during_preload_keeps_requested_consumer() {
        let runtime = Arc::new(ScriptedRuntime {
            tokenizer_delay: Some(Duration::from_secs(1)),
            ..ScriptedRuntime::new()
        });
        let coordinator = coordinator(8.0, runtime, CoordinatorConfig::default());
        let mut rx = coordinator.subscribe();

        let start = coordinator.spawn_start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            coordinator.state().await.active_consumer,
            ActiveConsumer::Preloading
        );

        assert_eq!(
            coordinator.request_switch_to_chatbot().await,
            SwitchOutcome::Switched {
                from: None,
                to: Consumer::Chatbot,
            }
        );
        let state = start.await.unwrap();

        assert_eq!(state.active_consumer, ActiveConsumer::Chatbot);
        assert!(state.preload_complete);
        assert_eq!(
            drain(&mut rx),
            vec![
                CoordinatorEvent::PreloadStarted,
                CoordinatorEvent::Activate(Consumer::Chatbot),
                CoordinatorEvent::PreloadComplete,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn preload_failure_after_switch_disposes_new_holder() {
        let runtime = Arc::new(ScriptedRuntime {
            tokenizer_delay: Some(Duration::from_secs(1)),
            ..ScriptedRuntime::new()
        });
        runtime.fail_tokenizer.store(true, Ordering::SeqCst);
        let coordinator = coordinator(8.0, runtime, CoordinatorConfig::default());
        let mut rx = coordinator.subscribe();

        let start = coordinator.spawn_start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.request_switch_to_chatbot().await;
        let state = start.await.unwrap();

        assert_eq!(state.active_consumer, ActiveConsumer::None);
        assert!(!state.has_sufficient_resources);
        let events = drain(&mut rx);
        assert_eq!(
            events[..3],
            [
                CoordinatorEvent::PreloadStarted,
                CoordinatorEvent::Activate(Consumer::Chatbot),
                CoordinatorEvent::Dispose(Consumer::Chatbot),
            ]
        );
        assert!(matches!(
            events.get(3),
            Some(CoordinatorEvent::Downgraded { .. })
        ));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn switching_to_active_consumer_is_a_no_op() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let coordinator = coordinator(8.0, runtime, CoordinatorConfig::default());
        coordinator.start().await;
        let mut rx = coordinator.subscribe();

        assert_eq!(
            coordinator.request_switch_to_translator().await,
            SwitchOutcome::AlreadyActive
        );
        assert!(drain(&mut rx).is_empty());
    }
}
