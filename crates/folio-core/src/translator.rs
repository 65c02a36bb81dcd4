//! Page translator: the translator consumer of the local device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{Consumer, ModelConsumer};
use crate::loader::{GenerationOptions, LazyModelLoader, LoadStatus};

pub const DEFAULT_TARGET_LANGUAGE: &str = "eng_Latn";
pub const BATCH_SIZE: usize = 4;
pub const MAX_NEW_TOKENS: usize = 128;
/// Segments at or below this many characters (after trimming) are left as is.
pub const MIN_SEGMENT_CHARS: usize = 2;

/// Browser language subtag to NLLB language code.
pub const LANGUAGE_MAP: &[(&str, &str)] = &[
    ("en", "eng_Latn"),
    ("es", "spa_Latn"),
    ("fr", "fra_Latn"),
    ("de", "deu_Latn"),
    ("it", "ita_Latn"),
    ("pt", "por_Latn"),
    ("zh", "zho_Hans"),
    ("ja", "jpn_Jpan"),
    ("ko", "kor_Hang"),
    ("ru", "rus_Cyrl"),
    ("hi", "hin_Deva"),
    ("ar", "arb_Arab"),
];

/// Resolve a locale such as `es-MX` or `pt_BR` to an NLLB code.
pub fn language_for_locale(locale: &str) -> &'static str {
    let primary = locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    LANGUAGE_MAP
        .iter()
        .find(|(code, _)| *code == primary)
        .map(|(_, nllb)| *nllb)
        .unwrap_or(DEFAULT_TARGET_LANGUAGE)
}

pub struct PageTranslator {
    loader: Arc<LazyModelLoader>,
    target_language: RwLock<String>,
    active: AtomicBool,
    /// Latched on the first load failure; the page stays untranslated for
    /// the rest of the session.
    load_failed: AtomicBool,
}

impl PageTranslator {
    pub fn new(loader: Arc<LazyModelLoader>, locale: &str) -> Self {
        Self {
            loader,
            target_language: RwLock::new(language_for_locale(locale).to_string()),
            active: AtomicBool::new(false),
            load_failed: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn has_load_failed(&self) -> bool {
        self.load_failed.load(Ordering::Acquire)
    }

    pub fn loader(&self) -> &LazyModelLoader {
        &self.loader
    }

    pub fn target_language(&self) -> String {
        self.target_language
            .read()
            .map(|lang| lang.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set_locale(&self, locale: &str) {
        let language = language_for_locale(locale);
        match self.target_language.write() {
            Ok(mut current) => *current = language.to_string(),
            Err(poisoned) => *poisoned.into_inner() = language.to_string(),
        }
    }

    /// Translate `segments` into the target language.
    ///
    /// The result has one entry per input segment; `None` marks a segment
    /// that was skipped, produced no text, or was not reached because the
    /// translator was deactivated mid-run.
    pub async fn translate_segments(&self, segments: &[String]) -> Result<Vec<Option<String>>> {
        let mut results: Vec<Option<String>> = vec![None; segments.len()];
        if !self.is_active() || self.has_load_failed() {
            debug!("Translator unavailable, skipping {} segments", segments.len());
            return Ok(results);
        }
        if self.loader.status() != LoadStatus::Ready {
            match self.loader.ensure_loaded().await {
                Ok(LoadStatus::Ready) => {}
                Ok(_) => {
                    debug!("Translator model still loading, skipping run");
                    return Ok(results);
                }
                Err(err) => {
                    self.latch_load_failure(&err);
                    return Ok(results);
                }
            }
        }

        let pending: Vec<(usize, String)> = segments
            .iter()
            .enumerate()
            .filter_map(|(idx, segment)| {
                let trimmed = segment.trim();
                (trimmed.chars().count() > MIN_SEGMENT_CHARS).then(|| (idx, trimmed.to_string()))
            })
            .collect();

        let target = self.target_language();
        let options = GenerationOptions {
            max_new_tokens: MAX_NEW_TOKENS,
            ..GenerationOptions::default()
        };
        info!(segments = pending.len(), target = %target, "Translating page");

        for (batch_no, batch) in pending.chunks(BATCH_SIZE).enumerate() {
            if !self.is_active() {
                info!("Translator deactivated, stopping after {batch_no} batches");
                break;
            }

            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let outputs = self
                .loader
                .infer_batch(&texts, Some(&target), &options)
                .await?;

            for ((idx, _), output) in batch.iter().zip(outputs) {
                let cleaned = strip_language_token(&output, &target);
                if !cleaned.is_empty() {
                    results[*idx] = Some(cleaned);
                }
            }
        }

        Ok(results)
    }

    fn latch_load_failure(&self, err: &Error) {
        warn!("Translator model failed to load, leaving page untranslated for this session: {err}");
        self.load_failed.store(true, Ordering::Release);
    }
}

fn strip_language_token(output: &str, target: &str) -> String {
    let trimmed = output.trim();
    trimmed
        .strip_prefix(target)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

#[async_trait]
impl ModelConsumer for PageTranslator {
    fn consumer(&self) -> Consumer {
        Consumer::Translator
    }

    fn claim(&self) -> u64 {
        self.active.store(true, Ordering::Release);
        self.loader.generation()
    }

    async fn warm_up(&self, generation: u64) {
        if self.has_load_failed() || !self.is_active() {
            return;
        }
        info!(generation, "Translator activated");
        if let Err(err) = self.loader.ensure_loaded_for(generation).await {
            self.latch_load_failure(&err);
        }
    }

    async fn dispose(&self) {
        self.active.store(false, Ordering::Release);
        self.loader.dispose();
    }
}
