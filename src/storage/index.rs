//! Dual store index
//!
//! Embeddings go to the vector store, raw chunk text to the content store, both
//! under one freshly minted id per chunk. Retrieval scores the query against every
//! stored vector and resolves the winners back to content, so callers never see an
//! id or an embedding.

use crate::config::{DistanceMetric, RetrievalConfig};
use crate::error::{MedragError, Result};
use crate::ml::embedding::EmbeddingProvider;
use crate::ml::search::top_k;
use crate::storage::database::{Database, IndexStats, StoredChunk};
use crate::text::chunking::{ChunkOrigin, TextChunk};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A chunk as stored in the index
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub doc_id: Uuid,
    pub content: String,
    pub origin: ChunkOrigin,
    pub metadata: BTreeMap<String, String>,
}

/// A retrieval hit, resolved to content
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub content: String,
    pub origin: ChunkOrigin,
    pub score: f32,
}

/// Vector store + content store joined on `doc_id`
pub struct DualStoreIndex<E> {
    database: Database,
    embedder: E,
    metric: DistanceMetric,
    default_k: usize,
}

impl<E: EmbeddingProvider> DualStoreIndex<E> {
    pub fn new(database: Database, embedder: E, config: &RetrievalConfig) -> Self {
        Self {
            database,
            embedder,
            metric: config.metric,
            default_k: config.top_k.max(1),
        }
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    /// Embed and store `chunks`, each under a new id.
    ///
    /// Ids are minted per call, so indexing the same chunks twice stores them twice.
    pub async fn index(&mut self, chunks: &[TextChunk]) -> Result<Vec<Chunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed_documents(&contents)
            .await
            .map_err(|e| MedragError::Indexing(format!("embedding failed: {}", e)))?;
        if embeddings.len() != chunks.len() {
            return Err(MedragError::Indexing(format!(
                "embedding provider returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        let dimension = self.embedder.dimension();
        if let Some(bad) = embeddings.iter().find(|embedding| embedding.len() != dimension) {
            return Err(MedragError::Indexing(format!(
                "embedding provider returned a {}-dimensional vector, expected {}",
                bad.len(),
                dimension
            )));
        }

        let stored: Vec<StoredChunk> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| StoredChunk {
                doc_id: Uuid::new_v4(),
                content: chunk.content.clone(),
                origin: chunk.origin.clone(),
                metadata: chunk.metadata.clone(),
                embedding,
            })
            .collect();

        self.database
            .insert_chunks(&stored)
            .map_err(|e| MedragError::Indexing(e.to_string()))?;

        Ok(stored
            .into_iter()
            .map(|chunk| Chunk {
                doc_id: chunk.doc_id,
                content: chunk.content,
                origin: chunk.origin,
                metadata: chunk.metadata,
            })
            .collect())
    }

    /// Top `k` chunks for `query` (configured `top_k` when `None`), best first
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Result<Vec<RetrievedChunk>> {
        let k = k.unwrap_or(self.default_k);
        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| MedragError::Retrieval(format!("query embedding failed: {}", e)))?;
        if query_embedding.len() != self.embedder.dimension() {
            return Err(MedragError::Retrieval(format!(
                "query embedding has {} dimensions, expected {}",
                query_embedding.len(),
                self.embedder.dimension()
            )));
        }

        let candidates = self
            .database
            .load_vectors()
            .map_err(|e| MedragError::Retrieval(e.to_string()))?;
        let hits = top_k(&query_embedding, candidates, k, self.metric);

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self
                .database
                .get_content(&hit.key)
                .map_err(|e| MedragError::Retrieval(e.to_string()))?
            {
                Some((content, origin)) => results.push(RetrievedChunk {
                    content,
                    origin,
                    score: hit.score,
                }),
                None => log::warn!("Vector {} has no stored content", hit.key),
            }
        }

        log::debug!("Retrieved {} chunks for query", results.len());
        Ok(results)
    }

    /// Wipe both stores and the persisted session
    pub fn clear(&mut self) -> Result<()> {
        self.database.clear()
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.database.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::embedding::Embedding;
    use crate::ml::embedding::testing::HashEmbedder;

    /// Claims one dimension, returns another
    struct MisreportingEmbedder;

    impl EmbeddingProvider for MisreportingEmbedder {
        fn dimension(&self) -> usize {
            384
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts.iter().map(|_| vec![0.5; 8]).collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Embedding> {
            Ok(vec![0.5; 8])
        }
    }

    fn index() -> DualStoreIndex<HashEmbedder> {
        DualStoreIndex::new(
            Database::memory().unwrap(),
            HashEmbedder::new(256),
            &RetrievalConfig::default(),
        )
    }

    fn chunk(content: &str, origin: ChunkOrigin) -> TextChunk {
        TextChunk {
            content: content.to_string(),
            metadata: BTreeMap::new(),
            origin,
            token_count: content.split_whitespace().count(),
        }
    }

    fn sample_chunks() -> Vec<TextChunk> {
        vec![
            chunk("hemoglobin level measured at 13.5", ChunkOrigin::Text { page: 1 }),
            chunk("patient reports mild headache since monday", ChunkOrigin::Text { page: 2 }),
            chunk(
                "a red circle on a white background",
                ChunkOrigin::Image {
                    image_ref: "image_2_1.png".to_string(),
                    page: 2,
                },
            ),
            chunk("follow-up appointment scheduled in two weeks", ChunkOrigin::Text { page: 3 }),
        ]
    }

    #[tokio::test]
    async fn test_every_chunk_retrieves_itself() {
        let mut index = index();
        let chunks = sample_chunks();
        index.index(&chunks).await.unwrap();

        for chunk in &chunks {
            let hits = index.retrieve(&chunk.content, Some(1)).await.unwrap();
            assert_eq!(hits[0].content, chunk.content);
            assert_eq!(hits[0].origin, chunk.origin);
        }
    }

    #[tokio::test]
    async fn test_indexing_twice_doubles_entries() {
        let mut index = index();
        let chunks = sample_chunks();

        let first = index.index(&chunks).await.unwrap();
        let second = index.index(&chunks).await.unwrap();

        let stats = index.stats().unwrap();
        assert_eq!(stats.vector_count, 2 * chunks.len());
        assert_eq!(stats.content_count, 2 * chunks.len());
        for (a, b) in first.iter().zip(&second) {
            assert_ne!(a.doc_id, b.doc_id);
        }
    }

    #[tokio::test]
    async fn test_default_k_limits_results() {
        let mut index = index();
        let mut chunks = sample_chunks();
        chunks.extend(sample_chunks());
        index.index(&chunks).await.unwrap();

        let hits = index.retrieve("headache", None).await.unwrap();
        assert_eq!(hits.len(), RetrievalConfig::default().top_k);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let index = index();
        assert!(index.retrieve("anything", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_empties_both_stores() {
        let mut index = index();
        index.index(&sample_chunks()).await.unwrap();
        index.clear().unwrap();

        let stats = index.stats().unwrap();
        assert_eq!(stats.vector_count, 0);
        assert_eq!(stats.content_count, 0);
    }

    #[tokio::test]
    async fn test_vectors_of_wrong_dimension_are_rejected() {
        let mut index = DualStoreIndex::new(
            Database::memory().unwrap(),
            MisreportingEmbedder,
            &RetrievalConfig::default(),
        );

        assert!(matches!(
            index.index(&sample_chunks()).await,
            Err(MedragError::Indexing(_))
        ));
        assert_eq!(index.stats().unwrap().vector_count, 0);
        assert!(matches!(
            index.retrieve("headache", None).await,
            Err(MedragError::Retrieval(_))
        ));
    }
}
