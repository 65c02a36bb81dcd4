//! Typed publish/subscribe channel between the coordinator and model consumers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_BUS_CAPACITY: usize = 64;

/// The two local-model consumers competing for the inference device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consumer {
    Translator,
    Chatbot,
}

impl Consumer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Translator => "translator",
            Self::Chatbot => "chatbot",
        }
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    PreloadStarted,
    PreloadComplete,
    /// Local models are off for the rest of the session.
    Downgraded { reason: String },
    Dispose(Consumer),
    Activate(Consumer),
}

impl CoordinatorEvent {
    /// The consumer this event is addressed to, if any.
    pub fn target(&self) -> Option<Consumer> {
        match self {
            Self::Dispose(consumer) | Self::Activate(consumer) => Some(*consumer),
            _ => None,
        }
    }
}

/// Session-scoped broadcast bus. Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: CoordinatorEvent) {
        debug!(?event, "Publishing coordinator event");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A component that holds a local model on behalf of one [`Consumer`].
#[async_trait]
pub trait ModelConsumer: Send + Sync {
    fn consumer(&self) -> Consumer;

    /// Take the device without waiting for the model. The returned
    /// generation ties the follow-up [`ModelConsumer::warm_up`] to this
    /// activation.
    fn claim(&self) -> u64;

    /// Load the model for the activation made under `generation`. A no-op
    /// once that activation has been disposed.
    async fn warm_up(&self, generation: u64);

    async fn dispose(&self);

    async fn activate(&self) {
        let generation = self.claim();
        self.warm_up(generation).await;
    }
}

/// Forward bus events addressed to `consumer` until the bus closes.
///
/// Warm-ups run on their own tasks; a `Dispose` never queues behind a
/// model download.
pub fn attach<C>(bus: &EventBus, consumer: Arc<C>) -> JoinHandle<()>
where
    C: ModelConsumer + ?Sized + 'static,
{
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let me = consumer.consumer();
        loop {
            match rx.recv().await {
                Ok(CoordinatorEvent::Activate(target)) if target == me => {
                    let generation = consumer.claim();
                    let warming = Arc::clone(&consumer);
                    tokio::spawn(async move { warming.warm_up(generation).await });
                }
                Ok(CoordinatorEvent::Dispose(target)) if target == me => {
                    consumer.dispose().await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(consumer = %me, skipped, "Consumer lagged behind coordinator events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
