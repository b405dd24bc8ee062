//! Error types for medrag
//!
//! Every pipeline stage reports through [`MedragError`]. Captioning failures are
//! recoverable and only logged by the describer; everything else bubbles up to the
//! entry points in [`crate::api::service`], which turn it into a structured reply.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum MedragError {
    /// Source document cannot be opened or parsed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A single image could not be captioned
    #[error("Captioning error: {0}")]
    Captioning(String),

    /// Embedding or storage failure while building the index
    #[error("Indexing error: {0}")]
    Indexing(String),

    /// Nothing relevant came back from the index, or the lookup failed
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Prompt construction or model invocation failed
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// A question arrived before any document was ingested
    #[error("RAG pipeline not initialized")]
    NotInitialized,

    /// The ingested document carries no page text
    #[error("No text data found in the document")]
    EmptyDocument,

    /// Caller supplied an unusable request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream model provider errors
    #[error("Model provider error: {0}")]
    Provider(String),

    /// Local model download and loading errors
    #[error("Machine learning error: {0}")]
    MachineLearning(String),

    /// Candle ML framework errors
    #[error("Candle ML error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Tokenizer and text processing errors
    #[error("Text processing error: {0}")]
    TextProcessing(String),

    /// Database/storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Image processing errors
    #[error("Image processing error: {0}")]
    Image(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MedragError>;

impl From<lopdf::Error> for MedragError {
    fn from(err: lopdf::Error) -> Self {
        MedragError::Extraction(err.to_string())
    }
}

impl From<image::ImageError> for MedragError {
    fn from(err: image::ImageError) -> Self {
        MedragError::Image(err.to_string())
    }
}

impl From<async_openai::error::OpenAIError> for MedragError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        MedragError::Provider(err.to_string())
    }
}

impl From<base64::DecodeError> for MedragError {
    fn from(err: base64::DecodeError) -> Self {
        MedragError::InvalidRequest(format!("image is not valid base64: {}", err))
    }
}

impl From<uuid::Error> for MedragError {
    fn from(err: uuid::Error) -> Self {
        MedragError::Storage(format!("corrupt chunk identifier: {}", err))
    }
}
