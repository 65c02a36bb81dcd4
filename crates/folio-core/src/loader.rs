//! Lazy lifecycle of one consumer's tokenizer + model pair.
//!
//! The inference runtime itself is supplied from outside through
//! [`ModelRuntime`]; the loader only owns when things are loaded, released and
//! used.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capability::ExecutionDevice;
use crate::error::{Error, Result};
use crate::events::Consumer;

/// Identifies the model assets a loader pulls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,
    /// Quantisation hint passed through to the runtime (`q8`, `q4`, ...).
    pub dtype: String,
}

impl ModelSpec {
    pub fn new(model_id: impl Into<String>, dtype: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            dtype: dtype.into(),
        }
    }

    pub fn default_translator() -> Self {
        Self::new("Xenova/nllb-200-distilled-600M", "q8")
    }

    pub fn default_chatbot() -> Self {
        Self::new("onnx-community/gemma-3-1b-it-ONNX-GQA", "q4")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    /// Token forced as the first generated token (target language for NLLB).
    #[serde(default)]
    pub forced_bos_token_id: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            forced_bos_token_id: None,
        }
    }
}

pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Look up a single special token such as a language code.
    fn token_id(&self, token: &str) -> Option<u32>;
}

#[async_trait]
pub trait ModelSession: Send + Sync {
    async fn generate(&self, input_ids: &[u32], options: &GenerationOptions) -> Result<Vec<u32>>;

    /// Free device resources. Called at most once per session.
    fn release(&self) {}
}

/// Callback receiving download progress in percent.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Third-party inference runtime.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Download and cache the tokenizer assets without creating a session.
    async fn fetch_tokenizer(&self, spec: &ModelSpec) -> Result<Arc<dyn TextTokenizer>>;

    async fn load_session(
        &self,
        spec: &ModelSpec,
        device: ExecutionDevice,
        progress: ProgressFn,
    ) -> Result<Arc<dyn ModelSession>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoaderSnapshot {
    pub consumer: Consumer,
    pub model_id: String,
    pub status: LoadStatus,
    pub status_message: String,
}

/// The loaded pair, exclusively owned by one loader.
struct ModelHandle {
    tokenizer: Arc<dyn TextTokenizer>,
    session: Arc<dyn ModelSession>,
}

struct LoaderState {
    handle: Option<ModelHandle>,
    status: LoadStatus,
    status_message: String,
    /// Bumped by every dispose; a load started under an older generation is stale.
    generation: u64,
    /// Generation of the load currently in flight, if any.
    loading: Option<u64>,
}

pub struct LazyModelLoader {
    consumer: Consumer,
    spec: ModelSpec,
    device: ExecutionDevice,
    runtime: Arc<dyn ModelRuntime>,
    state: Arc<Mutex<LoaderState>>,
    inferring: AtomicBool,
}

impl LazyModelLoader {
    pub fn new(
        consumer: Consumer,
        spec: ModelSpec,
        device: ExecutionDevice,
        runtime: Arc<dyn ModelRuntime>,
    ) -> Self {
        Self {
            consumer,
            spec,
            device,
            runtime,
            state: Arc::new(Mutex::new(LoaderState {
                handle: None,
                status: LoadStatus::Idle,
                status_message: String::new(),
                generation: 0,
                loading: None,
            })),
            inferring: AtomicBool::new(false),
        }
    }

    pub fn consumer(&self) -> Consumer {
        self.consumer
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn status(&self) -> LoadStatus {
        self.lock_state().status
    }

    /// Current generation; changes on every [`LazyModelLoader::dispose`].
    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    pub fn snapshot(&self) -> LoaderSnapshot {
        let state = self.lock_state();
        LoaderSnapshot {
            consumer: self.consumer,
            model_id: self.spec.model_id.clone(),
            status: state.status,
            status_message: state.status_message.clone(),
        }
    }

    /// Load the tokenizer and model if they are not loaded yet.
    ///
    /// While another call is already loading this returns `Loading` without
    /// starting a second load.
    pub async fn ensure_loaded(&self) -> Result<LoadStatus> {
        let generation = self.generation();
        self.ensure_loaded_for(generation).await
    }

    /// Like [`LazyModelLoader::ensure_loaded`], but only on behalf of
    /// `generation`. Returns `Idle` without loading once a dispose has moved
    /// the loader past it.
    ///
    /// A load left over from an older generation never blocks a newer one:
    /// the new generation starts its own load and the old result is dropped.
    pub async fn ensure_loaded_for(&self, generation: u64) -> Result<LoadStatus> {
        {
            let mut state = self.lock_state();
            if state.generation != generation {
                return Ok(LoadStatus::Idle);
            }
            if state.status == LoadStatus::Ready {
                return Ok(LoadStatus::Ready);
            }
            if state.loading == Some(generation) {
                return Ok(LoadStatus::Loading);
            }
            state.loading = Some(generation);
            state.status = LoadStatus::Loading;
            state.status_message = "Loading model...".to_string();
        }
        let ticket = LoadTicket {
            state: self.state.as_ref(),
            generation,
            finished: false,
        };
        info!(consumer = %self.consumer, model = %self.spec.model_id, device = self.device.as_str(), generation, "Loading local model");

        let loaded = self.fetch_pair(generation).await;

        let mut state = self.lock_state();
        ticket.finish(&mut state);
        if state.generation != generation {
            if let Ok(handle) = loaded {
                handle.session.release();
            }
            info!(consumer = %self.consumer, generation, "Discarding model load superseded by dispose");
            return Ok(LoadStatus::Idle);
        }

        match loaded {
            Ok(handle) => {
                state.handle = Some(handle);
                state.status = LoadStatus::Ready;
                state.status_message = "Model ready.".to_string();
                info!(consumer = %self.consumer, model = %self.spec.model_id, "Local model ready");
                Ok(LoadStatus::Ready)
            }
            Err(err) => {
                state.handle = None;
                state.status = LoadStatus::Error;
                state.status_message = format!("Failed to load: {err}");
                warn!(consumer = %self.consumer, model = %self.spec.model_id, "Local model load failed: {err}");
                Err(match err {
                    Error::Load(_) => err,
                    other => Error::Load(other.to_string()),
                })
            }
        }
    }

    async fn fetch_pair(&self, generation: u64) -> Result<ModelHandle> {
        let tokenizer = self.runtime.fetch_tokenizer(&self.spec).await?;

        let state = Arc::clone(&self.state);
        let progress: ProgressFn = Arc::new(move |percent: f32| {
            if let Ok(mut state) = state.lock() {
                if state.generation == generation && state.status == LoadStatus::Loading {
                    state.status_message = format!("Downloading: {}%", percent.round() as i64);
                }
            }
        });

        let session = self
            .runtime
            .load_session(&self.spec, self.device, progress)
            .await?;

        Ok(ModelHandle { tokenizer, session })
    }

    /// Release the loaded pair. Safe to call when nothing is loaded.
    pub fn dispose(&self) {
        let handle = {
            let mut state = self.lock_state();
            state.generation = state.generation.wrapping_add(1);
            state.status = LoadStatus::Idle;
            state.status_message.clear();
            state.handle.take()
        };

        if let Some(handle) = handle {
            handle.session.release();
            info!(consumer = %self.consumer, "Disposed local model");
        }
    }

    /// Generate text for a single prompt.
    pub async fn infer(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let (tokenizer, session) = self.ready_pair()?;
        let _guard = self.begin_inference()?;

        let input_ids = tokenizer.encode(prompt)?;
        if input_ids.is_empty() {
            return Err(Error::InvalidInput("prompt produced zero tokens".to_string()));
        }
        let output_ids = session.generate(&input_ids, options).await?;
        tokenizer.decode(&output_ids)
    }

    /// Generate for a batch of texts, forcing `forced_token` (when given) as
    /// the first output token of every item.
    pub async fn infer_batch(
        &self,
        texts: &[String],
        forced_token: Option<&str>,
        options: &GenerationOptions,
    ) -> Result<Vec<String>> {
        let (tokenizer, session) = self.ready_pair()?;
        let _guard = self.begin_inference()?;

        let mut options = options.clone();
        if let Some(token) = forced_token {
            let id = tokenizer.token_id(token).ok_or_else(|| {
                Error::Inference(format!("Tokenizer has no id for token {token}"))
            })?;
            options.forced_bos_token_id = Some(id);
        }

        let mut outputs = Vec::with_capacity(texts.len());
        for text in texts {
            let input_ids = tokenizer.encode(text)?;
            let output_ids = session.generate(&input_ids, &options).await?;
            outputs.push(tokenizer.decode(&output_ids)?);
        }
        Ok(outputs)
    }

    fn ready_pair(&self) -> Result<(Arc<dyn TextTokenizer>, Arc<dyn ModelSession>)> {
        let state = self.lock_state();
        match (&state.handle, state.status) {
            (Some(handle), LoadStatus::Ready) => {
                Ok((Arc::clone(&handle.tokenizer), Arc::clone(&handle.session)))
            }
            (_, status) => Err(Error::Inference(format!(
                "{} model is not ready (status: {status:?})",
                self.consumer
            ))),
        }
    }

    fn begin_inference(&self) -> Result<InferenceGuard<'_>> {
        if self
            .inferring
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy(format!(
                "{} model is already generating",
                self.consumer
            )));
        }
        Ok(InferenceGuard {
            flag: &self.inferring,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoaderState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct InferenceGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InferenceGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Clears the in-flight marker if a load future is dropped before it
/// finishes, so the same generation can load again.
struct LoadTicket<'a> {
    state: &'a Mutex<LoaderState>,
    generation: u64,
    finished: bool,
}

impl LoadTicket<'_> {
    fn finish(mut self, state: &mut LoaderState) {
        if state.loading == Some(self.generation) {
            state.loading = None;
        }
        self.finished = true;
    }
}

impl Drop for LoadTicket<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.loading == Some(self.generation) {
            state.loading = None;
            if state.generation == self.generation && state.status == LoadStatus::Loading {
                state.status = LoadStatus::Idle;
                state.status_message.clear();
            }
        }
    }
}
