//! # medrag
//!
//! Retrieval-augmented question answering over medical PDF records. A document is
//! split into page text and embedded images; images are captioned by a vision
//! model; page text and captions are chunked, embedded and stored in a dual
//! vector/content index; questions are answered from the best-matching chunks, or
//! from the whole document when a summary is requested.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medrag::{Config, RagService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut service = RagService::from_config(Config::load(None)?)?;
//!
//!     let stats = service.upload("uploads/record.pdf").await?;
//!     println!("Indexed {} text chunks", stats.text_chunks);
//!
//!     println!("{}", service.ask("What was the blood pressure?").await?);
//!     println!("{}", service.ask("summarize").await?);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod ml;
pub mod storage;
pub mod text;
pub mod utils;
pub mod vision;

// Re-export main API types
pub use api::{IngestStats, RagService, Reply, ReplyBody, RetrievedContext, Session, chat_loop};
pub use config::Config;
pub use error::{MedragError, Result};

// Re-export commonly used types
pub use ml::{ChatMessage, ChatModel, EmbeddingProvider};
pub use storage::IndexStats;
pub use text::{ChunkOrigin, Page};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_imports() {
        // Ensure all major types can be imported
        let _config = Config::default();
        let _origin = ChunkOrigin::Text { page: 1 };
    }
}
