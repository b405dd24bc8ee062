//! Model-facing capabilities
//!
//! Tokenization for chunk budgets, embedding providers, the chat/vision model
//! abstraction and exact vector similarity search.

pub mod chat;
pub mod embedding;
pub mod search;
pub mod text;

// Re-export main types and functions
pub use chat::{ChatMessage, ChatModel, ContentPart, OpenAiChatModel, Role};
pub use embedding::{
    Embedding, EmbeddingModel, EmbeddingProvider, LocalEmbedder, ModelFiles, OpenAiEmbedder,
};
pub use search::{ScoredId, cosine_similarity, top_k};
pub use text::{TextProcessor, TokenSpan};
