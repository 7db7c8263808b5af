use anyhow::{anyhow, Context, Result};
use candle::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::mistral::{Config as MistralConfig, Model as Mistral};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    EngineError, GenerationEngine, GenerationOutput, GenerationSender, GenerationStream,
    SamplingParams,
};

const STREAM_BUFFER: usize = 64;

/// Token strings treated as end-of-turn in addition to the model's configured EOS ids.
const EXTRA_STOP_TOKENS: &[&str] = &["</s>", "<|im_end|>", "<|eot_id|>", "<|endoftext|>"];

// ---------------------------------------------------------
// Model files (local snapshot or Hugging Face hub)
// ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub tokenizer: PathBuf,
    pub config: PathBuf,
    pub tokenizer_config: Option<PathBuf>,
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// `model` is either a local snapshot directory or a hub repo id.
    pub fn resolve(model: &str) -> Result<Self> {
        let local = Path::new(model);
        if local.is_dir() {
            info!(path = %local.display(), "using local model snapshot");
            return Self::from_dir(local);
        }

        info!(repo = model, "fetching model from the Hugging Face hub");
        let api = hf_hub::api::sync::Api::new().context("failed to initialise hub client")?;
        let repo = api.model(model.to_string());

        let tokenizer = repo.get("tokenizer.json").context("tokenizer.json")?;
        let config = repo.get("config.json").context("config.json")?;
        let tokenizer_config = match repo.get("tokenizer_config.json") {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(repo = model, error = %err, "tokenizer_config.json unavailable");
                None
            }
        };

        let weights = match repo.get("model.safetensors.index.json") {
            Ok(index) => shard_names(&index)?
                .into_iter()
                .map(|name| repo.get(&name).with_context(|| format!("weight shard {name}")))
                .collect::<Result<Vec<_>>>()?,
            Err(_) => vec![repo.get("model.safetensors").context("model.safetensors")?],
        };

        Ok(Self {
            tokenizer,
            config,
            tokenizer_config,
            weights,
        })
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let index = dir.join("model.safetensors.index.json");
        let weights = if index.exists() {
            shard_names(&index)?
                .into_iter()
                .map(|name| dir.join(name))
                .collect()
        } else {
            vec![dir.join("model.safetensors")]
        };

        let tokenizer_config = Some(dir.join("tokenizer_config.json")).filter(|p| p.exists());

        Ok(Self {
            tokenizer: dir.join("tokenizer.json"),
            config: dir.join("config.json"),
            tokenizer_config,
            weights,
        })
    }
}

/// Unique shard file names listed in a safetensors index.
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let index_json: serde_json::Value = serde_json::from_slice(&fs::read(index_path)?)?;
    let names = index_json["weight_map"]
        .as_object()
        .ok_or_else(|| anyhow!("{}: weight_map is not an object", index_path.display()))?
        .values()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("invalid shard entry in {}", index_path.display()))
        })
        .collect::<Result<BTreeSet<_>>>()?;
    Ok(names.into_iter().collect())
}

// ---------------------------------------------------------
// Engine
// ---------------------------------------------------------
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub gpu_count: usize,
    pub max_model_len: usize,
}

/// Mistral-architecture causal LM running on candle.
#[derive(Clone)]
pub struct CandleEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    model: Mutex<Mistral>,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_ids: Vec<u32>,
    max_model_len: usize,
}

impl CandleEngine {
    pub fn load(files: &ModelFiles, opts: EngineOptions) -> Result<Self> {
        let device = select_device(opts.gpu_count)?;
        info!(device = ?device, "loading model");

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("tokenizer error ({}): {e}", files.tokenizer.display()))?;

        let raw_cfg = fs::read(&files.config)
            .with_context(|| format!("failed to read {}", files.config.display()))?;
        let cfg: MistralConfig = serde_json::from_slice(&raw_cfg)
            .with_context(|| format!("unsupported model config {}", files.config.display()))?;
        let cfg_json: serde_json::Value = serde_json::from_slice(&raw_cfg)?;

        let eos_token_ids = eos_token_ids(&cfg_json, &tokenizer);
        if eos_token_ids.is_empty() {
            warn!("no end-of-sequence token found; generation stops only at the token limit");
        }

        debug!(shards = files.weights.len(), "mapping weights");
        let dtype = if device.is_cuda() { DType::F16 } else { DType::F32 };
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device)? };
        let model = Mistral::new(&cfg, vb)?;

        info!(
            max_model_len = opts.max_model_len,
            eos = ?eos_token_ids,
            "model loaded"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                model: Mutex::new(model),
                tokenizer,
                device,
                eos_token_ids,
                max_model_len: opts.max_model_len,
            }),
        })
    }
}

impl GenerationEngine for CandleEngine {
    fn generate(
        &self,
        request_id: String,
        prompt: String,
        params: SamplingParams,
    ) -> GenerationStream {
        let (tx, stream) = GenerationStream::channel(STREAM_BUFFER);
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || {
            debug!(request_id = request_id.as_str(), "generation queued");
            match inner.run(&prompt, params, &tx) {
                Ok(()) => debug!(request_id = request_id.as_str(), "generation done"),
                Err(err) => {
                    error!(request_id = request_id.as_str(), error = %err, "generation failed");
                    let _ = tx.blocking_send(Err(err));
                }
            }
        });

        stream
    }
}

impl EngineInner {
    fn run(
        &self,
        prompt: &str,
        params: SamplingParams,
        tx: &GenerationSender,
    ) -> Result<(), EngineError> {
        // The chat template already carries the special tokens.
        let enc = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;
        let mut tokens = enc.get_ids().to_vec();

        let budget = token_budget(tokens.len(), params.max_tokens, self.max_model_len)?;

        // One request at a time per model; later requests queue here.
        let mut model = self.model.blocking_lock();
        model.clear_kv_cache();

        let temperature = (params.temperature > 0.0).then_some(f64::from(params.temperature));
        let mut lp = LogitsProcessor::new(rand::random::<u64>(), temperature, None);

        let mut generated: Vec<u32> = Vec::new();
        let mut sent = String::new();
        let mut pos = 0usize;

        for _ in 0..budget {
            if tx.is_cancelled() {
                return Ok(());
            }

            let ctx: &[u32] = if pos == 0 {
                &tokens
            } else {
                &tokens[tokens.len() - 1..]
            };

            let input = Tensor::new(ctx, &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(inference_error)?;
            let logits = model
                .forward(&input, pos)
                .and_then(|out| {
                    let seq_len = out.dim(1)?;
                    out.i((0, seq_len - 1))?.to_dtype(DType::F32)
                })
                .map_err(inference_error)?;

            pos += ctx.len();

            let next_id = lp.sample(&logits).map_err(inference_error)?;
            tokens.push(next_id);

            if self.eos_token_ids.contains(&next_id) {
                break;
            }
            generated.push(next_id);

            let text = self.decode(&generated)?;
            // Wait for the rest of a multi-byte character.
            if text.ends_with('\u{FFFD}') || text == sent {
                continue;
            }

            sent = text.clone();
            let update = GenerationOutput {
                text,
                finished: false,
            };
            if !tx.blocking_send(Ok(update)) {
                return Ok(());
            }
        }

        let text = self.decode(&generated)?;
        tx.blocking_send(Ok(GenerationOutput {
            text,
            finished: true,
        }));
        Ok(())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, EngineError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| EngineError::Tokenization(e.to_string()))
    }
}

// ---------------------------------------------------------
// Helpers
// ---------------------------------------------------------
fn inference_error(err: impl Display) -> EngineError {
    EngineError::Inference(err.to_string())
}

fn select_device(gpu_count: usize) -> Result<Device> {
    if gpu_count == 0 {
        return Ok(Device::Cpu);
    }
    if gpu_count > 1 {
        warn!(gpu_count, "tensor parallelism is not supported, using a single device");
    }
    Ok(Device::cuda_if_available(0)?)
}

/// Number of new tokens allowed for a prompt of `prompt_len` tokens.
fn token_budget(
    prompt_len: usize,
    max_tokens: usize,
    max_model_len: usize,
) -> Result<usize, EngineError> {
    // The forward pass needs at least one position.
    if prompt_len == 0 {
        return Err(EngineError::Tokenization("empty prompt".into()));
    }
    if prompt_len >= max_model_len {
        return Err(EngineError::ContextOverflow {
            prompt_tokens: prompt_len,
            context: max_model_len,
        });
    }
    Ok(max_tokens.min(max_model_len - prompt_len))
}

/// `eos_token_id` from config.json (number or list) plus known end-of-turn tokens.
fn eos_token_ids(cfg: &serde_json::Value, tokenizer: &Tokenizer) -> Vec<u32> {
    let mut ids = configured_eos_ids(cfg);
    for tok in EXTRA_STOP_TOKENS {
        if let Some(id) = tokenizer.token_to_id(tok) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn configured_eos_ids(cfg: &serde_json::Value) -> Vec<u32> {
    let to_id = |v: &serde_json::Value| v.as_u64().and_then(|n| u32::try_from(n).ok());
    match &cfg["eos_token_id"] {
        serde_json::Value::Array(list) => list.iter().filter_map(to_id).collect(),
        other => to_id(other).into_iter().collect(),
    }
}
