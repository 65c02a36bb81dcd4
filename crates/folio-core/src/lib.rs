//! Hybrid local/remote model backend for the folio portfolio site.
//!
//! A capability probe decides once per session whether local inference is
//! viable. When it is, [`ModelCoordinator`] hands the single local device to
//! either the [`ChatAssistant`] or the [`PageTranslator`] through an
//! [`EventBus`]; otherwise every chat turn goes to the [`RemoteGenerator`].

pub mod assistant;
pub mod capability;
pub mod chat_types;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod loader;
pub mod remote;
pub mod retry;
pub mod stack;
pub mod translator;

pub use assistant::{AssistantReply, ChatAssistant, ResponseSource};
pub use capability::{probe, CapabilityResult, ExecutionDevice, ProbeThresholds, RuntimeHints};
pub use chat_types::{render_transcript, ChatRole, ConversationMessage};
pub use coordinator::{
    ActiveConsumer, CoordinatorConfig, CoordinatorState, ModelCoordinator, SwitchOutcome,
};
pub use error::{Error, Result};
pub use events::{attach, Consumer, CoordinatorEvent, EventBus, ModelConsumer};
pub use loader::{
    GenerationOptions, LazyModelLoader, LoadStatus, LoaderSnapshot, ModelRuntime, ModelSession,
    ModelSpec, ProgressFn, TextTokenizer,
};
pub use remote::{GeminiClient, RemoteConfig, RemoteGenerator};
pub use retry::RetryPolicy;
pub use stack::ModelStack;
pub use translator::{language_for_locale, PageTranslator};
