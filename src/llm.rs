use std::num::NonZeroU32;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::Value;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaLoraAdapter, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use crate::error::CycleError;
use crate::producer::TextModel;

// ---------------------------------------------------------------------------
// Chat message helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.role, self.content)
    }
}

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// GGUF model file.
    pub model_path: PathBuf,
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Upper bound on tokens generated per call.
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    /// Fixes the sampling seed sequence for reproducible runs. `None` seeds
    /// from entropy.
    pub seed: Option<u64>,
    /// Fine-tuned LoRA adapter applied on top of the base model.
    pub lora_adapter: Option<PathBuf>,
    pub lora_scale: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("gemma-3n-E4B-it-IQ4_NL.gguf"),
            n_gpu_layers: 0,
            n_ctx: 4096,
            max_tokens: 512,
            temperature: 0.8,
            top_p: 0.9,
            repeat_penalty: 1.1,
            seed: None,
            lora_adapter: None,
            lora_scale: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Hands out a fresh sampler seed for every generation call, so repeated
/// prompts do not replay the same token sequence.
#[derive(Debug)]
pub struct SeedSource(StdRng);

impl SeedSource {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self(StdRng::seed_from_u64(seed)),
            None => Self(StdRng::from_entropy()),
        }
    }

    pub fn next_seed(&mut self) -> u32 {
        self.0.gen()
    }
}

fn build_sampler(config: &ModelConfig, seed: u32) -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(64, config.repeat_penalty, 0.0, 0.0),
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(config.top_p, 1),
        LlamaSampler::min_p(0.0, 1),
        LlamaSampler::temp(config.temperature),
        LlamaSampler::dist(seed),
    ])
}

// ---------------------------------------------------------------------------
// LLM — loaded model handle
// ---------------------------------------------------------------------------

pub struct LLM {
    #[allow(dead_code)]
    backend: &'static LlamaBackend,
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    // must stay alive while the context uses it
    _lora: Option<LlamaLoraAdapter>,
    seeds: SeedSource,
    config: ModelConfig,
}

impl LLM {
    pub fn load_model(config: ModelConfig) -> Result<Self> {
        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().context("failed to init llama backend")?,
        ));

        info!("Loading model from: {}", config.model_path.display());
        info!(
            "  config: n_gpu_layers={}, n_ctx={}, max_tokens={}",
            config.n_gpu_layers, config.n_ctx, config.max_tokens
        );

        let model_params = pin!(LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, &config.model_path, &model_params)
                .context("failed to load model")?,
        ));

        info!("Model loaded successfully");

        let n_ctx = NonZeroU32::new(config.n_ctx).context("n_ctx must be > 0")?;
        let ctx_params = LlamaContextParams::default().with_n_ctx(Some(n_ctx));
        let ctx = model
            .new_context(backend, ctx_params)
            .context("failed to create inference context")?;

        let lora = match &config.lora_adapter {
            Some(path) => {
                info!(
                    "Applying LoRA adapter {} (scale {})",
                    path.display(),
                    config.lora_scale
                );
                let mut adapter = model
                    .lora_adapter_init(path)
                    .context("failed to load LoRA adapter")?;
                ctx.lora_adapter_set(&mut adapter, config.lora_scale)
                    .context("failed to apply LoRA adapter")?;
                Some(adapter)
            }
            None => None,
        };

        Ok(Self {
            backend,
            model,
            ctx,
            _lora: lora,
            seeds: SeedSource::new(config.seed),
            config,
        })
    }

    /// Chat completion through the model's own chat template.
    pub fn chat(&mut self, messages: &[ChatMessage], max_tokens: usize) -> Result<String> {
        info!("=== LLM CHAT: {} messages ===", messages.len());
        for (i, msg) in messages.iter().enumerate() {
            debug!("  msg[{i}] {msg}");
        }

        let llama_msgs: Vec<LlamaChatMessage> = messages
            .iter()
            .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to create chat messages")?;

        let tmpl = self
            .model
            .chat_template(None)
            .context("model has no chat template")?;
        let prompt = self
            .model
            .apply_chat_template(&tmpl, &llama_msgs, true)
            .context("failed to apply chat template")?;

        self.generate(&prompt, max_tokens)
    }

    /// Plain completion of a raw prompt, no chat template.
    pub fn complete(&mut self, prompt: &str, max_tokens: usize) -> Result<String> {
        info!("=== LLM COMPLETION: {} chars of prompt ===", prompt.len());
        self.generate(prompt, max_tokens)
    }

    /// Core generation: tokenize the prompt, feed it, sample tokens.
    fn generate(&mut self, prompt: &str, max_tokens: usize) -> Result<String> {
        trace!("=== RENDERED PROMPT ===\n{prompt}\n=== END PROMPT ===");

        self.ctx.clear_kv_cache();

        let tokens = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .context("tokenization failed")?;

        info!("Prompt tokenized: {} tokens", tokens.len());
        anyhow::ensure!(!tokens.is_empty(), "prompt produced no tokens");
        anyhow::ensure!(
            tokens.len() < self.config.n_ctx as usize,
            "prompt of {} tokens does not fit a context of {}",
            tokens.len(),
            self.config.n_ctx
        );

        let mut batch = LlamaBatch::new(self.config.n_ctx as usize, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, tok) in (0i32..).zip(tokens.iter()) {
            batch.add(*tok, i, &[0], i == last_idx)?;
        }
        self.ctx
            .decode(&mut batch)
            .context("initial decode failed")?;

        let seed = self.seeds.next_seed();
        debug!("Sampling with seed {seed}");
        let mut sampler = build_sampler(&self.config, seed);
        let mut output = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();
        let budget = max_tokens.min(self.config.max_tokens);

        for _ in 0..budget {
            if n_cur as u32 >= self.config.n_ctx {
                debug!("Context window full, stopping generation");
                break;
            }

            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                debug!("Hit EOG token, stopping generation");
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, true, None)
                .context("token_to_piece failed")?;
            output.push_str(&piece);

            batch.clear();
            batch.add(tok, n_cur, &[0], true)?;
            self.ctx.decode(&mut batch).context("decode step failed")?;
            n_cur += 1;
        }

        debug!(
            "=== LLM RAW OUTPUT ({} chars) ===\n{}\n=== END OUTPUT ===",
            output.len(),
            output
        );

        Ok(output)
    }
}

impl TextModel for LLM {
    fn complete(&mut self, prompt: &str, max_tokens: usize) -> Result<String> {
        LLM::complete(self, prompt, max_tokens)
    }

    fn chat(&mut self, messages: &[ChatMessage], max_tokens: usize) -> Result<String> {
        LLM::chat(self, messages, max_tokens)
    }
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think pattern is valid"));

static JSON_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json span pattern is valid"));

/// Pull the JSON object out of free-form model output: everything from the
/// first `{` to the last `}`, after dropping `<think>` blocks.
pub fn extract_json(raw: &str) -> Result<Value, CycleError> {
    for cap in THINK_BLOCK.captures_iter(raw) {
        let thought = cap.get(1).map_or("", |m| m.as_str()).trim();
        if !thought.is_empty() {
            debug!("Model thinking:\n{thought}");
        }
    }

    let cleaned = THINK_BLOCK.replace_all(raw, "");
    let json_str = JSON_SPAN
        .find(&cleaned)
        .map(|m| m.as_str())
        .ok_or_else(|| CycleError::UnresolvedJson {
            reason: "no JSON object found".into(),
            raw: raw.to_string(),
        })?;

    debug!("Extracted JSON: {json_str}");

    serde_json::from_str(json_str).map_err(|e| CycleError::UnresolvedJson {
        reason: format!("failed to parse JSON: {e}"),
        raw: raw.to_string(),
    })
}
