//! Configuration for the ingestion and question-answering pipeline
//!
//! All sections have sensible defaults so `Config::default()` runs against a local
//! index with an in-process sentence-transformer embedding model. A JSON file may override any subset of
//! fields and a handful of environment variables override provider credentials.

use crate::error::{MedragError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable carrying the chat/vision provider API key
pub const ENV_API_KEY: &str = "MEDRAG_API_KEY";
/// Environment variable overriding the provider base URL
pub const ENV_BASE_URL: &str = "MEDRAG_BASE_URL";
/// Environment variable overriding the chat model name
pub const ENV_MODEL: &str = "MEDRAG_MODEL";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub captioning: CaptionConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
}

/// Token-window chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk
    pub chunk_size: usize,
    /// Tokens shared by consecutive chunks of the same source
    pub overlap: usize,
    /// Optional `tokenizer.json` of the target LLM; whitespace tokens otherwise
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 3000,
            overlap: 50,
            tokenizer_path: None,
        }
    }
}

/// OpenAI-compatible chat/vision provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama3-70b-8192".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Sentence-transformer run in-process with candle
    Local,
    /// `/embeddings` endpoint of an OpenAI-compatible provider
    OpenAi,
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Remote model name (ignored by the local backend)
    pub model: String,
    /// Hugging Face hub id of the local model
    pub local_model: String,
    /// Hub revision of the local model
    pub revision: String,
    /// Tokens per input seen by the local model; longer inputs are truncated
    pub max_length: usize,
    /// Vector dimension; remote vectors must match it, the local model reports its own
    pub dimension: usize,
    /// Falls back to the LLM key when empty
    pub api_key: String,
    pub base_url: String,
    /// Maximum inputs per remote request
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: "text-embedding-3-small".to_string(),
            local_model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            revision: "main".to_string(),
            max_length: 256,
            dimension: 384,
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            batch_size: 64,
        }
    }
}

/// Image captioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    /// Instruction used when captioning images for the index
    pub prompt: String,
    /// Refill interval of the captioning gate, in milliseconds (0 disables it)
    pub interval_ms: u64,
    /// Calls allowed back-to-back before the interval applies
    pub burst: u32,
}

impl CaptionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            prompt: "Describe the image in detail.".to_string(),
            interval_ms: 5000,
            burst: 1,
        }
    }
}

/// Direct image-question cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept; 0 disables caching
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Similarity function applied by the vector store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    DotProduct,
    Euclidean,
}

/// Retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub metric: DistanceMetric,
    /// Attach the persisted source image of caption hits to the prompt
    pub attach_source_images: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            metric: DistanceMetric::Cosine,
            attach_source_images: false,
        }
    }
}

/// On-disk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the vector store, content store and session pages
    pub index_path: PathBuf,
    /// Root of the per-document image directories
    pub image_dir: PathBuf,
    /// Wipe both stores, and other documents' images, before indexing a new document
    pub clear_on_ingest: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("medrag_index.db"),
            image_dir: PathBuf::from("extracted_images"),
            clear_on_ingest: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file; missing fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MedragError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override provider settings from `MEDRAG_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.llm.api_key = key;
        }
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var(ENV_MODEL) {
            self.llm.model = model;
        }
    }

    /// Reject settings that would break chunking or retrieval invariants
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(MedragError::Config("chunk_size must be positive".to_string()));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(MedragError::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(MedragError::Config("top_k must be positive".to_string()));
        }
        if self.embedding.dimension == 0 {
            return Err(MedragError::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(MedragError::Config(
                "embedding batch_size must be positive".to_string(),
            ));
        }
        if self.embedding.max_length == 0 {
            return Err(MedragError::Config(
                "embedding max_length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
