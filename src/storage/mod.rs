//! Storage functionality for medrag
//!
//! SQLite persistence of the vector store, the content store and the last
//! ingested session, plus the [`DualStoreIndex`] built on top of them.

pub mod database;
pub mod index;
pub mod schema;

// Re-export main types
pub use database::{Database, IndexStats, StoredChunk};
pub use index::{Chunk, DualStoreIndex, RetrievedChunk};
