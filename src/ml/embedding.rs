//! Embedding providers
//!
//! The index treats embeddings as an opaque capability: text in, fixed-size vector
//! out, used identically for chunks and queries. Two backends ship with the crate:
//! a sentence-transformer run in-process with candle (weights fetched once from the
//! Hugging Face hub), and a client for the `/embeddings` endpoint of any
//! OpenAI-compatible provider.

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{MedragError, Result};
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::{Client, config::OpenAIConfig};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Maps text to fixed-size vectors
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed a batch of chunk contents, preserving order
    fn embed_documents(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Embedding>>> + Send;

    /// Embed a single query string
    fn embed_query(&self, text: &str) -> impl Future<Output = Result<Embedding>> + Send;
}

/// Files making up a BERT-family sentence-transformer
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Download (or reuse from the hub cache) `config.json`, `tokenizer.json` and
    /// `model.safetensors`
    pub fn fetch(model_id: &str, revision: &str) -> Result<Self> {
        let api = Api::new().map_err(|e| {
            MedragError::MachineLearning(format!("Failed to create HF API: {}", e))
        })?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        let get = |file_name: &str| {
            repo.get(file_name).map_err(|e| {
                MedragError::MachineLearning(format!(
                    "Failed to download {}/{}: {}",
                    model_id, file_name, e
                ))
            })
        };

        let files = Self {
            config: get("config.json")?,
            tokenizer: get("tokenizer.json")?,
            weights: get("model.safetensors")?,
        };
        log::debug!("Model files for {}: {:?}", model_id, files);
        Ok(files)
    }
}

/// Sentence-transformer embeddings computed in-process.
///
/// Token states are mean-pooled over the attention mask and L2-normalized, which is
/// how sentence-transformers produces all-MiniLM-L6-v2 vectors.
pub struct LocalEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
    batch_size: usize,
}

impl LocalEmbedder {
    /// Fetch the configured model from the hub and load it
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        log::info!(
            "Loading embedding model {} ({})",
            config.local_model,
            config.revision
        );
        let files = ModelFiles::fetch(&config.local_model, &config.revision)?;
        Self::load(&files, config.max_length, config.batch_size)
    }

    /// Load a model from files already on disk
    pub fn load(files: &ModelFiles, max_length: usize, batch_size: usize) -> Result<Self> {
        let device = select_device();
        log::info!("Using device: {:?}", device);

        let raw_config = std::fs::read_to_string(&files.config)?;
        let shape: serde_json::Value = serde_json::from_str(&raw_config)?;
        let dimension = shape["hidden_size"].as_u64().ok_or_else(|| {
            MedragError::MachineLearning("model config has no hidden_size".to_string())
        })? as usize;
        let max_positions = shape["max_position_embeddings"].as_u64().unwrap_or(512) as usize;
        let bert_config: BertConfig = serde_json::from_str(&raw_config)?;

        let tokenizer = load_model_tokenizer(&files.tokenizer, max_length.min(max_positions))?;

        // SAFETY: the hub cache is not rewritten while the weights are mapped
        let weights = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights.as_path()], DTYPE, &device)?
        };
        let model = BertModel::load(weights, &bert_config)?;
        log::info!("Embedding model ready ({} dimensions)", dimension);

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    /// Embed synchronously, one forward pass per batch
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.forward(batch)?);
        }
        Ok(embeddings)
    }

    fn forward(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| MedragError::TextProcessing(format!("Tokenization failed: {}", e)))?;

        let mut ids = Vec::with_capacity(encodings.len());
        let mut masks = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            ids.push(Tensor::new(encoding.get_ids(), &self.device)?);
            masks.push(Tensor::new(encoding.get_attention_mask(), &self.device)?);
        }
        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean over real tokens only; padding must not dilute short inputs
        let mask = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;
        let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = pooled.broadcast_div(&norms)?;

        Ok(normalized.to_vec2::<f32>()?)
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let embeddings = self.encode_batch(texts)?;
        log::debug!("Embedded {} texts locally", texts.len());
        Ok(embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.encode_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| MedragError::MachineLearning("model returned no embedding".to_string()))
    }
}

/// Tokenizer configured for batched inference: pad to the longest input, truncate
/// at `max_length`
fn load_model_tokenizer(path: &Path, max_length: usize) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| MedragError::TextProcessing(format!("Failed to load tokenizer: {}", e)))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| MedragError::TextProcessing(format!("Invalid truncation: {}", e)))?;
    Ok(tokenizer)
}

fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }
    Device::Cpu
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, fallback_api_key: &str) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(MedragError::Config("missing embedding model name".to_string()));
        }
        let api_key = if config.api_key.is_empty() {
            fallback_api_key
        } else {
            &config.api_key
        };
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.base_url.trim_end_matches('/'));

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Embedding>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(batch.to_vec())
            .build()?;

        let response = self.client.embeddings().create(request).await?;
        let mut data = response.data;
        if data.len() != batch.len() {
            return Err(MedragError::Provider(format!(
                "embedding provider returned {} vectors for {} inputs",
                data.len(),
                batch.len()
            )));
        }
        data.sort_by_key(|item| item.index);

        data.into_iter()
            .map(|item| {
                if item.embedding.len() != self.dimension {
                    return Err(MedragError::Provider(format!(
                        "model {} returned {}-dimensional vectors, configured dimension is {}",
                        self.model,
                        item.embedding.len(),
                        self.dimension
                    )));
                }
                Ok(item.embedding)
            })
            .collect()
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_batch(batch).await?);
        }
        log::debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| MedragError::Provider("empty embedding response".to_string()))
    }
}

/// Embedding backend selected by configuration
pub enum EmbeddingModel {
    Local(LocalEmbedder),
    OpenAi(OpenAiEmbedder),
}

impl EmbeddingModel {
    /// Build the configured backend; `fallback_api_key` is the chat provider key
    pub fn from_config(config: &EmbeddingConfig, fallback_api_key: &str) -> Result<Self> {
        let model = match config.backend {
            EmbeddingBackend::Local => EmbeddingModel::Local(LocalEmbedder::from_config(config)?),
            EmbeddingBackend::OpenAi => {
                EmbeddingModel::OpenAi(OpenAiEmbedder::new(config, fallback_api_key)?)
            }
        };
        if model.dimension() != config.dimension {
            log::warn!(
                "Embedding model produces {} dimensions, configuration says {}",
                model.dimension(),
                config.dimension
            );
        }
        log::info!(
            "Embedding backend: {:?} ({} dimensions)",
            config.backend,
            model.dimension()
        );
        Ok(model)
    }
}

impl EmbeddingProvider for EmbeddingModel {
    fn dimension(&self) -> usize {
        match self {
            EmbeddingModel::Local(model) => model.dimension(),
            EmbeddingModel::OpenAi(model) => model.dimension(),
        }
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        match self {
            EmbeddingModel::Local(model) => model.embed_documents(texts).await,
            EmbeddingModel::OpenAi(model) => model.embed_documents(texts).await,
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        match self {
            EmbeddingModel::Local(model) => model.embed_query(text).await,
            EmbeddingModel::OpenAi(model) => model.embed_query(text).await,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::search::cosine_similarity;
    use approx::assert_relative_eq;

    #[test]
    fn test_remote_backend_requires_model_name() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::OpenAi,
            model: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EmbeddingModel::from_config(&config, "key"),
            Err(MedragError::Config(_))
        ));
    }

    #[test]
    fn test_remote_backend_reports_configured_dimension() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::OpenAi,
            dimension: 1536,
            ..Default::default()
        };
        let model = EmbeddingModel::from_config(&config, "key").unwrap();
        assert_eq!(model.dimension(), 1536);
    }

    #[test]
    fn test_missing_model_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let files = ModelFiles {
            config: dir.path().join("config.json"),
            tokenizer: dir.path().join("tokenizer.json"),
            weights: dir.path().join("model.safetensors"),
        };
        assert!(matches!(
            LocalEmbedder::load(&files, 256, 8),
            Err(MedragError::Io(_))
        ));
    }

    #[tokio::test]
    #[ignore = "downloads all-MiniLM-L6-v2 from the Hugging Face hub"]
    async fn test_local_model_matches_paraphrases() {
        let embedder = LocalEmbedder::from_config(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.dimension(), 384);

        let query = embedder.embed_query("hypertension").await.unwrap();
        let docs = embedder
            .embed_documents(&[
                "patient has high blood pressure".to_string(),
                "follow-up appointment booked for tuesday".to_string(),
            ])
            .await
            .unwrap();

        let norm: f32 = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-4);
        let related = cosine_similarity(&query, &docs[0]);
        assert!(related > 0.1);
        assert!(related > cosine_similarity(&query, &docs[1]));
    }

    #[test]
    fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = testing::HashEmbedder::new(64);
        let a = embedder.encode("Hemoglobin 13.5 g/dL");
        assert_eq!(a, embedder.encode("hemoglobin 13.5 G/DL"));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
    }
}
