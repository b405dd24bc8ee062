//! API layer for medrag
//!
//! Query-side stages (retrieval, synthesis), the session they share, and the
//! [`RagService`] entry points that drive the whole pipeline.

pub mod chat;
pub mod retriever;
pub mod service;
pub mod session;
pub mod synthesizer;

// Re-export main API types
pub use chat::chat_loop;
pub use retriever::{RetrievedContext, Retriever};
pub use service::{ImageCaption, RagService, Reply, ReplyBody};
pub use session::{IngestStats, Session};
pub use synthesizer::{AnswerSynthesizer, build_prompt, build_summary_prompt, is_summary_request};
