//! Sentence embedders behind the `docqa_core::Embedder` trait.
//!
//! `BertEmbedder` runs a local sentence-transformers BERT checkpoint with
//! candle (mean pooling + L2 normalization). `HashEmbedder` is a model-free
//! stand-in selected with `APP_USE_FAKE_EMBEDDINGS=1`.
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use docqa_core::{Embedder, Settings};

mod device;
mod hash;
mod pool;
mod tokenize;

pub use device::select_device;
pub use hash::{HashEmbedder, DEFAULT_HASH_DIM};
pub use pool::masked_mean_l2;
pub use tokenize::{tokenize_batch, BatchInputs};

const MAX_TOKENS: usize = 256;
const BATCH_SIZE: usize = 32;

pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    pad_id: u32,
    dim: usize,
    id: String,
}

impl BertEmbedder {
    /// Load `tokenizer.json`, `config.json` and the weights
    /// (`model.safetensors`, else `pytorch_model.bin`) from `model_dir`.
    pub fn load(model_dir: &Path, model_name: &str) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), model = model_name, "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let pad_id = tokenizer.token_to_id("[PAD]").unwrap_or(0);

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: BertConfig = serde_json::from_str(&raw_config)?;
        let dim = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("config.json has no hidden_size"))? as usize;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = BertModel::load(vb, &config)?;

        let short_name = model_name.rsplit('/').next().unwrap_or(model_name);
        let id = format!("bert:{short_name}:d{dim}");
        info!(embedder = %id, "embedding model loaded");
        Ok(Self { model, tokenizer, device, pad_id, dim, id })
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs = tokenize_batch(&self.tokenizer, texts, MAX_TOKENS, self.pad_id, &self.device)?;
        let hidden = self.model.forward(
            &inputs.input_ids,
            &inputs.token_type_ids,
            Some(&inputs.attention_mask),
        )?;
        let pooled = masked_mean_l2(&hidden, &inputs.attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        Ok(rows)
    }
}

impl Embedder for BertEmbedder {
    fn embedder_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            out.extend(self.embed_chunk(batch)?);
        }
        debug!(n = texts.len(), ms = start.elapsed().as_millis() as u64, "embedded batch");
        Ok(out)
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        let tensors = candle_core::pickle::read_all(&pickle)?;
        return tensors
            .into_iter()
            .map(|(name, t)| Ok((name, t.to_device(device)?)))
            .collect();
    }
    Err(anyhow!("no model.safetensors or pytorch_model.bin in {}", model_dir.display()))
}

/// The embedder for this process: `HashEmbedder` when `APP_USE_FAKE_EMBEDDINGS`
/// is set, otherwise the BERT model named by `settings.embedding_model`.
pub fn get_default_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_fake {
        info!("using hash embedder (APP_USE_FAKE_EMBEDDINGS)");
        return Ok(Arc::new(HashEmbedder::default()));
    }
    let dir = resolve_model_dir(settings)?;
    Ok(Arc::new(BertEmbedder::load(&dir, &settings.embedding_model)?))
}

/// First existing directory of: `settings.model_dir`, `$APP_MODEL_DIR`,
/// `$MODEL_DIR`, `models/<name>`, `../models/<name>`.
pub fn resolve_model_dir(settings: &Settings) -> Result<PathBuf> {
    let name = settings
        .embedding_model
        .rsplit('/')
        .next()
        .unwrap_or(settings.embedding_model.as_str());
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = &settings.model_dir {
        candidates.push(dir.clone());
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            candidates.push(PathBuf::from(dir));
        }
    }
    candidates.push(Path::new("models").join(name));
    candidates.push(Path::new("../models").join(name));

    for candidate in &candidates {
        if candidate.is_dir() {
            debug!(dir = %candidate.display(), "using model dir");
            return Ok(candidate.clone());
        }
    }
    warn!(model = %settings.embedding_model, "model directory not found");
    Err(anyhow!(
        "Could not locate model directory for {} (tried {})",
        settings.embedding_model,
        candidates.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    ))
}
