//! Document extraction and chunking
//!
//! [`pdf`] turns a PDF into page texts and image files; [`chunking`] cuts page
//! texts and image captions into bounded, overlapping token windows.

pub mod chunking;
pub mod pdf;

// Re-export main types and functions
pub use chunking::{ChunkOrigin, SourceText, TextChunk, TextChunker};
pub use pdf::{EmbeddedImage, ExtractedDocument, ImageFormat, Page, PdfProcessor};
