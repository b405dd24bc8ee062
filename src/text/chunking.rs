//! Token-window chunking
//!
//! Page texts and image captions go through the same rule: slide a window of
//! `chunk_size` tokens with a stride of `chunk_size - overlap`, and cut the source
//! text at the byte offsets of the first and last token in each window. Every chunk
//! therefore stays within budget and shares exactly `overlap` tokens with the next.

use crate::config::ChunkingConfig;
use crate::error::{MedragError, Result};
use crate::ml::text::TextProcessor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a chunk came from; kept with the chunk all the way into the content store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkOrigin {
    /// Text extracted from a page (1-based)
    Text { page: u32 },
    /// Caption of an embedded image, referenced by its file name
    Image { image_ref: String, page: u32 },
}

impl ChunkOrigin {
    pub fn is_image(&self) -> bool {
        matches!(self, ChunkOrigin::Image { .. })
    }

    pub fn page(&self) -> u32 {
        match self {
            ChunkOrigin::Text { page } | ChunkOrigin::Image { page, .. } => *page,
        }
    }
}

/// A document handed to the chunker
#[derive(Debug, Clone, PartialEq)]
pub struct SourceText {
    pub page_content: String,
    pub metadata: BTreeMap<String, String>,
    pub origin: ChunkOrigin,
}

impl SourceText {
    pub fn new(page_content: impl Into<String>, origin: ChunkOrigin) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: BTreeMap::new(),
            origin,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A bounded piece of a [`SourceText`]
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub origin: ChunkOrigin,
    /// Tokens in this chunk as counted by the chunker's tokenizer
    pub token_count: usize,
}

/// Splits documents into overlapping token windows
pub struct TextChunker {
    config: ChunkingConfig,
    processor: TextProcessor,
}

impl TextChunker {
    /// Create a new chunker, loading the configured tokenizer if any
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        let processor = TextProcessor::with_tokenizer(config.tokenizer_path.as_deref())?;
        Self::with_processor(config, processor)
    }

    /// Create a chunker around an existing processor
    pub fn with_processor(config: ChunkingConfig, processor: TextProcessor) -> Result<Self> {
        if config.chunk_size == 0 || config.overlap >= config.chunk_size {
            return Err(MedragError::Config(format!(
                "invalid chunking window: size {} overlap {}",
                config.chunk_size, config.overlap
            )));
        }
        Ok(Self { config, processor })
    }

    pub fn processor(&self) -> &TextProcessor {
        &self.processor
    }

    /// Split every document, keeping document order
    pub fn split_documents(&self, documents: &[SourceText]) -> Result<Vec<TextChunk>> {
        let mut chunks = Vec::new();
        for document in documents {
            chunks.extend(self.split_document(document)?);
        }
        log::debug!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );
        Ok(chunks)
    }

    /// Split one document; empty documents yield nothing
    pub fn split_document(&self, document: &SourceText) -> Result<Vec<TextChunk>> {
        Ok(self
            .chunk_text(&document.page_content)?
            .into_iter()
            .map(|(content, token_count)| TextChunk {
                content,
                metadata: document.metadata.clone(),
                origin: document.origin.clone(),
                token_count,
            })
            .collect())
    }

    /// Window `text` into `(content, token_count)` pairs
    pub fn chunk_text(&self, text: &str) -> Result<Vec<(String, usize)>> {
        let spans = self.processor.token_spans(text)?;
        if spans.is_empty() {
            return Ok(Vec::new());
        }

        let size = self.config.chunk_size;
        let stride = size - self.config.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + size).min(spans.len());
            let slice = &text[spans[start].start..spans[end - 1].end];
            chunks.push((slice.to_string(), end - start));

            if end == spans.len() {
                break;
            }
            start += stride;
        }

        Ok(chunks)
    }
}
