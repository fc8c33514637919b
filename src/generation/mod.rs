//! Autoregressive generation controller.
//!
//! [`GenerationController`] owns a tokenizer and an execution session and
//! drives the decode loop: encode, forward pass, repetition penalty,
//! sampling, stop handling, and the optional per-token streaming callback.
//! A controller moves `Idle -> Generating -> Idle` on every call; concurrent
//! calls are rejected, cancellation is cooperative with one-decode-step
//! granularity, and the generating flag is cleared on every exit path.

pub mod config;
pub mod sampler;

pub use config::{GenerationConfig, GenerationOverrides};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::backend::ProviderChoice;
use crate::error::EngineError;
use crate::fetch::ArtifactSource;
use crate::runtime::ModelRuntime;
use crate::session::{LoadOptions, ModelSession, SessionStats};
use crate::tensor::TensorData;
use crate::tokenizer::{BpeTokenizer, ChatMessage, DecodeOptions, EncodeOptions};

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Selected an end-of-sequence or explicit stop token.
    StopToken,
    /// Reached the `max_new_tokens` limit.
    MaxTokens,
    /// Filled the context window; the partial result is returned.
    ContextLength,
    /// Cooperative cancellation via [`GenerationController::stop`].
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::StopToken => write!(f, "stop_token"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::ContextLength => write!(f, "context_length"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Output of one generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Generated ids, excluding the prompt and any stop token.
    pub token_ids: Vec<u32>,
    /// Decoded text (special tokens skipped).
    pub text: String,
    /// Why the decode loop ended.
    pub stop_reason: StopReason,
    /// Number of prompt tokens after encoding.
    pub prompt_tokens: usize,
}

/// Options for [`GenerationController::initialize`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Execution-provider preference for the model session.
    pub provider: ProviderChoice,
    /// Maximum tokens (prompt + generated) per sequence.
    pub max_context_length: usize,
    /// Persisted generation defaults.
    pub defaults: GenerationConfig,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            provider: ProviderChoice::Auto,
            max_context_length: 4096,
            defaults: GenerationConfig::default(),
        }
    }
}

/// Clears the generating flag on every exit path, including panics.
struct GeneratingGuard<'a>(&'a AtomicBool);

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Single-sequence autoregressive generation over an injected graph runtime.
pub struct GenerationController {
    tokenizer: Option<BpeTokenizer>,
    session: Mutex<ModelSession>,
    defaults: GenerationConfig,
    max_context_length: usize,
    generating: AtomicBool,
    cancel: AtomicBool,
}

impl GenerationController {
    /// Construct an uninitialized controller bound to a graph runtime.
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            tokenizer: None,
            session: Mutex::new(ModelSession::new(runtime)),
            defaults: GenerationConfig::default(),
            max_context_length: 4096,
            generating: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }

    /// Load the tokenizer and the model session. The controller is ready
    /// only when both loads succeed; a partial failure propagates and leaves
    /// it not-ready.
    pub fn initialize(
        &mut self,
        tokenizer_source: &ArtifactSource,
        model_source: &ArtifactSource,
        options: InitOptions,
    ) -> Result<(), EngineError> {
        self.initialize_with_progress(tokenizer_source, model_source, options, |_, _| {})
    }

    /// [`initialize`](Self::initialize) with a fetch-progress callback for
    /// URI sources.
    pub fn initialize_with_progress(
        &mut self,
        tokenizer_source: &ArtifactSource,
        model_source: &ArtifactSource,
        options: InitOptions,
        progress: impl Fn(u64, u64),
    ) -> Result<(), EngineError> {
        let tokenizer = BpeTokenizer::from_source(tokenizer_source, &progress)?;
        self.lock_session().load_with_progress(
            model_source,
            &LoadOptions {
                provider: options.provider,
                ..LoadOptions::default()
            },
            &progress,
        )?;

        self.tokenizer = Some(tokenizer);
        self.max_context_length = options.max_context_length;
        self.defaults = options.defaults;
        info!(
            max_context_length = self.max_context_length,
            "Generation controller initialized"
        );
        Ok(())
    }

    /// Shallow-merge overrides into the persisted defaults. No validation:
    /// out-of-range values take effect literally in the decode loop.
    pub fn set_generation_config(&mut self, overrides: &GenerationOverrides) {
        self.defaults.merge_from(overrides);
    }

    /// Generate a continuation and return the decoded text.
    pub fn generate(
        &self,
        prompt: &str,
        overrides: &GenerationOverrides,
    ) -> Result<String, EngineError> {
        self.run_generation(prompt, overrides, None)
            .map(|output| output.text)
    }

    /// Generate with full metadata (token ids, stop reason, prompt length).
    pub fn generate_full(
        &self,
        prompt: &str,
        overrides: &GenerationOverrides,
    ) -> Result<GenerationOutput, EngineError> {
        self.run_generation(prompt, overrides, None)
    }

    /// Generate, invoking the callback synchronously for each token with the
    /// decoded fragment and the raw id.
    pub fn generate_stream(
        &self,
        prompt: &str,
        overrides: &GenerationOverrides,
        mut on_token: impl FnMut(&str, u32),
    ) -> Result<GenerationOutput, EngineError> {
        self.run_generation(prompt, overrides, Some(&mut on_token))
    }

    /// Format a conversation, generate with the turn-end and next-speaker
    /// markers added to the stop set, and return the trimmed reply.
    pub fn chat(
        &self,
        messages: &[ChatMessage],
        overrides: &GenerationOverrides,
    ) -> Result<String, EngineError> {
        self.chat_inner(messages, overrides, None)
            .map(|output| output.text)
    }

    /// [`chat`](Self::chat) with a per-token streaming callback.
    pub fn stream_chat(
        &self,
        messages: &[ChatMessage],
        mut on_token: impl FnMut(&str, u32),
        overrides: &GenerationOverrides,
    ) -> Result<GenerationOutput, EngineError> {
        self.chat_inner(messages, overrides, Some(&mut on_token))
    }

    /// Request cooperative cancellation of the in-flight generation. Observed
    /// at the top of each decode step; an in-flight forward pass is never
    /// interrupted.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// True while a decode loop is active.
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    /// True when both the tokenizer and the model session are loaded.
    pub fn is_ready(&self) -> bool {
        self.tokenizer.is_some() && self.lock_session().is_ready()
    }

    /// The execution session's timing statistics.
    pub fn stats(&self) -> SessionStats {
        self.lock_session().stats().clone()
    }

    /// The provider the loaded session executes on, if any.
    pub fn provider(&self) -> Option<crate::backend::ExecutionProvider> {
        self.lock_session().provider()
    }

    /// Release the underlying model session. The controller stops reporting
    /// ready until re-initialized.
    pub fn release(&self) {
        self.lock_session().release();
    }

    /// The loaded tokenizer, if initialized.
    pub fn tokenizer(&self) -> Option<&BpeTokenizer> {
        self.tokenizer.as_ref()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, ModelSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chat_inner(
        &self,
        messages: &[ChatMessage],
        overrides: &GenerationOverrides,
        callback: Option<&mut dyn FnMut(&str, u32)>,
    ) -> Result<GenerationOutput, EngineError> {
        let tokenizer = self
            .tokenizer
            .as_ref()
            .ok_or(EngineError::NotReady("controller not initialized"))?;
        let prompt = tokenizer.format_chat(messages);

        let mut overrides = overrides.clone();
        let mut stops = overrides
            .stop_tokens
            .take()
            .unwrap_or_else(|| self.defaults.stop_tokens.clone());
        let vocab = tokenizer.vocab();
        for id in [vocab.end_of_turn_id(), vocab.user_marker_id()]
            .into_iter()
            .flatten()
        {
            if !stops.contains(&id) {
                stops.push(id);
            }
        }
        overrides.stop_tokens = Some(stops);

        let mut output = self.run_generation(&prompt, &overrides, callback)?;
        output.text = output.text.trim().to_string();
        Ok(output)
    }

    fn run_generation(
        &self,
        prompt: &str,
        overrides: &GenerationOverrides,
        mut callback: Option<&mut dyn FnMut(&str, u32)>,
    ) -> Result<GenerationOutput, EngineError> {
        let tokenizer = self
            .tokenizer
            .as_ref()
            .ok_or(EngineError::NotReady("controller not initialized"))?;

        let output_names = {
            let session = self.lock_session();
            if !session.is_ready() {
                return Err(EngineError::NotReady("model session not loaded"));
            }
            session.output_names().to_vec()
        };

        if self
            .generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyGenerating);
        }
        let _guard = GeneratingGuard(&self.generating);
        self.cancel.store(false, Ordering::SeqCst);

        let config = self.defaults.apply(overrides);

        let mut sequence = tokenizer.encode(
            prompt,
            &EncodeOptions {
                add_special_tokens: true,
                ..EncodeOptions::default()
            },
        );
        let prompt_tokens = sequence.len();
        if prompt_tokens >= self.max_context_length {
            return Err(EngineError::ContextLengthExceeded {
                prompt_len: prompt_tokens,
                max_context: self.max_context_length,
            });
        }

        let mut stop_ids: HashSet<u32> = config.stop_tokens.iter().copied().collect();
        if let Some(eos) = tokenizer.vocab().eos_id() {
            stop_ids.insert(eos);
        }

        let mut rng = sampler::XorShiftRng::new(config.seed.unwrap_or(42));
        let mut output_ids: Vec<u32> = Vec::new();
        let mut stop_reason = StopReason::MaxTokens;

        debug!(prompt_tokens, max_new_tokens = config.max_new_tokens, "Decode loop started");

        for step in 0..config.max_new_tokens {
            if self.cancel.load(Ordering::SeqCst) {
                debug!(step, "Cancellation requested");
                stop_reason = StopReason::Cancelled;
                break;
            }

            let len = sequence.len();
            let mut inputs = HashMap::new();
            inputs.insert(
                "input_ids".to_string(),
                TensorData::from_i64(
                    vec![1, len],
                    sequence.iter().map(|&id| i64::from(id)).collect(),
                ),
            );
            inputs.insert(
                "attention_mask".to_string(),
                TensorData::from_i64(vec![1, len], vec![1i64; len]),
            );

            let outputs = self.lock_session().run(&inputs)?;
            let mut logits = last_position_logits(&outputs, &output_names, len)?;

            sampler::apply_repetition_penalty(&mut logits, &sequence, config.repetition_penalty);
            let next = sampler::select_token(&logits, &config, &mut rng);

            if stop_ids.contains(&next) {
                debug!(step, token = next, "Stop token selected");
                stop_reason = StopReason::StopToken;
                break;
            }

            sequence.push(next);
            output_ids.push(next);

            if let Some(cb) = callback.as_mut() {
                let fragment = tokenizer.decode_fragment(next);
                cb(&fragment, next);
            }

            if sequence.len() >= self.max_context_length {
                debug!(step, "Context window filled");
                stop_reason = StopReason::ContextLength;
                break;
            }
        }

        let text = tokenizer.decode(&output_ids, &DecodeOptions::default());
        debug!(
            generated = output_ids.len(),
            stop_reason = %stop_reason,
            "Decode loop finished"
        );

        Ok(GenerationOutput {
            token_ids: output_ids,
            text,
            stop_reason,
            prompt_tokens,
        })
    }
}

/// Extract the final position's logits: the last vocabulary-length slice of
/// the output tensor whose trailing dimensions are `[sequence, vocabulary]`.
fn last_position_logits(
    outputs: &HashMap<String, TensorData>,
    output_names: &[String],
    seq_len: usize,
) -> Result<Vec<f32>, EngineError> {
    for name in output_names {
        let tensor = match outputs.get(name) {
            Some(tensor) => tensor,
            None => continue,
        };
        let shape = tensor.shape();
        if shape.len() < 2 || shape[shape.len() - 2] != seq_len {
            continue;
        }
        let vocab_size = shape[shape.len() - 1];
        let data = tensor.as_f32().ok_or_else(|| {
            EngineError::Inference(format!("Output '{}' must be F32 logits", name))
        })?;
        if vocab_size == 0 || data.len() < vocab_size {
            return Err(EngineError::Inference(format!(
                "Output '{}' too small for vocabulary dimension {}",
                name, vocab_size
            )));
        }
        return Ok(data[data.len() - vocab_size..].to_vec());
    }
    Err(EngineError::Inference(
        "No output tensor with [sequence, vocabulary] trailing dimensions".to_string(),
    ))
}
