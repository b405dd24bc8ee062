//! Retriever - query side of the index
//!
//! Looks a question up in the [`DualStoreIndex`] and sorts the hits into text and
//! image payloads using the origin recorded at chunk creation.

use crate::config::Config;
use crate::error::{MedragError, Result};
use crate::ml::embedding::EmbeddingProvider;
use crate::storage::index::{DualStoreIndex, RetrievedChunk};
use crate::text::chunking::ChunkOrigin;
use crate::utils::read_file_base64;
use std::collections::HashSet;
use std::path::PathBuf;

/// Context handed to the answer synthesizer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievedContext {
    /// Page text and image captions
    pub texts: Vec<String>,
    /// Base64-encoded source images
    pub images: Vec<String>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.images.is_empty()
    }
}

/// Index lookup plus origin-based classification
pub struct Retriever {
    image_dir: PathBuf,
    attach_source_images: bool,
    top_k: usize,
}

impl Retriever {
    pub fn new(config: &Config) -> Self {
        Self {
            image_dir: config.storage.image_dir.clone(),
            attach_source_images: config.retrieval.attach_source_images,
            top_k: config.retrieval.top_k,
        }
    }

    /// Fetch and classify the best chunks for `question`
    pub async fn retrieve<E: EmbeddingProvider>(
        &self,
        index: &DualStoreIndex<E>,
        question: &str,
    ) -> Result<RetrievedContext> {
        let hits = index.retrieve(question, Some(self.top_k)).await?;
        if hits.is_empty() {
            return Err(MedragError::Retrieval("No relevant context found".to_string()));
        }
        Ok(self.classify(hits))
    }

    /// Every hit's content is text; image hits may also attach their source image
    pub fn classify(&self, hits: Vec<RetrievedChunk>) -> RetrievedContext {
        let mut context = RetrievedContext::default();
        let mut attached = HashSet::new();

        for hit in hits {
            if let ChunkOrigin::Image { image_ref, .. } = &hit.origin {
                if self.attach_source_images && attached.insert(image_ref.clone()) {
                    let path = self.image_dir.join(image_ref);
                    match read_file_base64(&path) {
                        Ok(encoded) => context.images.push(encoded),
                        Err(e) => log::warn!("Source image {} unavailable: {}", path.display(), e),
                    }
                }
            }
            context.texts.push(hit.content);
        }

        log::debug!(
            "Classified context: {} texts, {} images",
            context.texts.len(),
            context.images.len()
        );
        context
    }
}
