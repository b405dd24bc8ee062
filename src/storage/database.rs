//! SQLite database operations for medrag
//!
//! One file holds the vector store, the content store and the persisted session.
//! Every write that touches more than one table runs in a single transaction.

use crate::error::{MedragError, Result};
use crate::ml::embedding::Embedding;
use crate::storage::schema::*;
use crate::text::chunking::ChunkOrigin;
use crate::text::pdf::Page;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// A chunk ready to be written to both stores
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub doc_id: Uuid,
    pub content: String,
    pub origin: ChunkOrigin,
    pub metadata: BTreeMap<String, String>,
    pub embedding: Embedding,
}

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database connection
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| MedragError::Storage(format!("Failed to open database: {}", e)))?;

        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            MedragError::Storage(format!("Failed to create in-memory database: {}", e))
        })?;

        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize database schema
    fn initialize(&mut self) -> Result<()> {
        // In-memory databases report "memory" here, which is fine
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| MedragError::Storage(format!("Failed to enable WAL mode: {}", e)))?;

        for (name, sql) in [
            ("vectors", CREATE_VECTORS_TABLE),
            ("contents", CREATE_CONTENTS_TABLE),
            ("pages", CREATE_PAGES_TABLE),
            ("metadata", CREATE_METADATA_TABLE),
        ] {
            self.conn.execute(sql, []).map_err(|e| {
                MedragError::Storage(format!("Failed to create {} table: {}", name, e))
            })?;
        }

        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
                params![SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string()],
            )
            .map_err(|e| MedragError::Storage(format!("Failed to set schema version: {}", e)))?;

        log::debug!("Database initialized with schema version {}", SCHEMA_VERSION);
        Ok(())
    }

    /// Insert chunks into the vector and content stores in one transaction
    pub fn insert_chunks(&mut self, chunks: &[StoredChunk]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| MedragError::Storage(format!("Failed to start transaction: {}", e)))?;

        {
            let mut vectors = tx
                .prepare(
                    "INSERT INTO vectors (doc_id, embedding, dimension, metadata, created_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .map_err(|e| MedragError::Storage(format!("Failed to prepare statement: {}", e)))?;
            let mut contents = tx
                .prepare("INSERT INTO contents (doc_id, origin, content) VALUES (?, ?, ?)")
                .map_err(|e| MedragError::Storage(format!("Failed to prepare statement: {}", e)))?;

            let created_at = chrono::Utc::now().to_rfc3339();
            for chunk in chunks {
                let doc_id = chunk.doc_id.to_string();
                vectors
                    .execute(params![
                        doc_id,
                        embedding_to_blob(&chunk.embedding),
                        chunk.embedding.len() as i64,
                        serde_json::to_string(&chunk.metadata)?,
                        created_at,
                    ])
                    .map_err(|e| {
                        MedragError::Storage(format!("Failed to insert vector {}: {}", doc_id, e))
                    })?;
                contents
                    .execute(params![
                        doc_id,
                        serde_json::to_string(&chunk.origin)?,
                        chunk.content
                    ])
                    .map_err(|e| {
                        MedragError::Storage(format!("Failed to insert content {}: {}", doc_id, e))
                    })?;
            }
        }

        tx.commit()
            .map_err(|e| MedragError::Storage(format!("Failed to commit transaction: {}", e)))?;

        log::info!("Inserted {} chunks into the index", chunks.len());
        Ok(())
    }

    /// Every stored vector with its id, in insertion order
    pub fn load_vectors(&self) -> Result<Vec<(Uuid, Embedding)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT doc_id, embedding FROM vectors ORDER BY rowid")
            .map_err(|e| MedragError::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|e| MedragError::Storage(format!("Failed to query vectors: {}", e)))?;

        let mut result = Vec::new();
        for row in rows {
            let (doc_id, blob) = row
                .map_err(|e| MedragError::Storage(format!("Failed to process vector row: {}", e)))?;
            result.push((Uuid::parse_str(&doc_id)?, blob_to_embedding(&blob)));
        }

        Ok(result)
    }

    /// Content and origin stored under `doc_id`
    pub fn get_content(&self, doc_id: &Uuid) -> Result<Option<(String, ChunkOrigin)>> {
        let row = self
            .conn
            .query_row(
                "SELECT content, origin FROM contents WHERE doc_id = ?",
                params![doc_id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|e| MedragError::Storage(format!("Failed to query content: {}", e)))?;

        match row {
            Some((content, origin)) => Ok(Some((content, serde_json::from_str(&origin)?))),
            None => Ok(None),
        }
    }

    /// Replace the persisted session with `pages` and `session`
    pub fn save_session<T: Serialize>(&mut self, pages: &[Page], session: &T) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| MedragError::Storage(format!("Failed to start transaction: {}", e)))?;

        clear_session(&tx)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO pages (page_index, text) VALUES (?, ?)")
                .map_err(|e| MedragError::Storage(format!("Failed to prepare statement: {}", e)))?;
            for page in pages {
                stmt.execute(params![page.index as i64, page.text])
                    .map_err(|e| {
                        MedragError::Storage(format!("Failed to insert page {}: {}", page.index, e))
                    })?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            params![SESSION_KEY, serde_json::to_string(session)?],
        )
        .map_err(|e| MedragError::Storage(format!("Failed to store session: {}", e)))?;

        tx.commit()
            .map_err(|e| MedragError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    /// Persisted pages and session, if a document was ingested
    pub fn load_session<T: DeserializeOwned>(&self) -> Result<Option<(Vec<Page>, T)>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?",
                params![SESSION_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MedragError::Storage(format!("Failed to query session: {}", e)))?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let session: T = serde_json::from_str(&raw)?;

        let mut stmt = self
            .conn
            .prepare("SELECT page_index, text FROM pages ORDER BY page_index")
            .map_err(|e| MedragError::Storage(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Page {
                    index: row.get::<_, i64>(0)? as u32,
                    text: row.get(1)?,
                })
            })
            .map_err(|e| MedragError::Storage(format!("Failed to query pages: {}", e)))?;

        let mut pages = Vec::new();
        for page in rows {
            pages.push(
                page.map_err(|e| MedragError::Storage(format!("Failed to process page row: {}", e)))?,
            );
        }

        Ok(Some((pages, session)))
    }

    /// Wipe both stores and the persisted session
    pub fn clear(&mut self) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| MedragError::Storage(format!("Failed to start transaction: {}", e)))?;

        tx.execute("DELETE FROM vectors", [])
            .map_err(|e| MedragError::Storage(format!("Failed to clear vectors: {}", e)))?;
        tx.execute("DELETE FROM contents", [])
            .map_err(|e| MedragError::Storage(format!("Failed to clear contents: {}", e)))?;
        clear_session(&tx)?;

        tx.commit()
            .map_err(|e| MedragError::Storage(format!("Failed to commit transaction: {}", e)))?;

        log::info!("Cleared index and session");
        Ok(())
    }

    fn count(&self, table: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .map_err(|e| MedragError::Storage(format!("Failed to count {}: {}", table, e)))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<IndexStats> {
        let file_size: i64 = self
            .conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )
            .map_err(|e| MedragError::Storage(format!("Failed to get database size: {}", e)))?;

        Ok(IndexStats {
            vector_count: self.count("vectors")?,
            content_count: self.count("contents")?,
            page_count: self.count("pages")?,
            file_size_bytes: file_size as u64,
        })
    }
}

fn clear_session(tx: &Transaction<'_>) -> Result<()> {
    tx.execute("DELETE FROM pages", [])
        .map_err(|e| MedragError::Storage(format!("Failed to clear pages: {}", e)))?;
    tx.execute("DELETE FROM metadata WHERE key = ?", params![SESSION_KEY])
        .map_err(|e| MedragError::Storage(format!("Failed to clear session: {}", e)))?;
    Ok(())
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

fn blob_to_embedding(blob: &[u8]) -> Embedding {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Index statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub vector_count: usize,
    pub content_count: usize,
    pub page_count: usize,
    pub file_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(content: &str, embedding: Embedding) -> StoredChunk {
        StoredChunk {
            doc_id: Uuid::new_v4(),
            content: content.to_string(),
            origin: ChunkOrigin::Text { page: 1 },
            metadata: BTreeMap::from([("source".to_string(), "page_1".to_string())]),
            embedding,
        }
    }

    #[test]
    fn test_insert_and_resolve() {
        let mut db = Database::memory().unwrap();
        let chunk = stored("blood pressure 120/80", vec![0.5, -0.25, 1.0]);
        db.insert_chunks(std::slice::from_ref(&chunk)).unwrap();

        let vectors = db.load_vectors().unwrap();
        assert_eq!(vectors, vec![(chunk.doc_id, vec![0.5, -0.25, 1.0])]);

        let (content, origin) = db.get_content(&chunk.doc_id).unwrap().unwrap();
        assert_eq!(content, "blood pressure 120/80");
        assert_eq!(origin, ChunkOrigin::Text { page: 1 });
        assert!(db.get_content(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_stores_stay_in_step() {
        let mut db = Database::memory().unwrap();
        db.insert_chunks(&[stored("a", vec![1.0]), stored("b", vec![0.0])])
            .unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.vector_count, 2);
        assert_eq!(stats.content_count, 2);
    }

    #[test]
    fn test_failed_insert_rolls_back_both_stores() {
        let mut db = Database::memory().unwrap();
        let chunk = stored("a", vec![1.0]);
        db.insert_chunks(std::slice::from_ref(&chunk)).unwrap();

        // Same id again violates the primary key halfway through the batch
        let result = db.insert_chunks(&[stored("b", vec![0.0]), chunk]);
        assert!(matches!(result, Err(MedragError::Storage(_))));

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.vector_count, 1);
        assert_eq!(stats.content_count, 1);
    }

    #[test]
    fn test_session_round_trip_and_clear() {
        let mut db = Database::memory().unwrap();
        assert!(db.load_session::<String>().unwrap().is_none());

        let pages = vec![
            Page { index: 1, text: "A".to_string() },
            Page { index: 2, text: "B".to_string() },
        ];
        db.save_session(&pages, &"record.pdf".to_string()).unwrap();
        db.insert_chunks(&[stored("A", vec![1.0])]).unwrap();

        let (loaded, source) = db.load_session::<String>().unwrap().unwrap();
        assert_eq!(loaded, pages);
        assert_eq!(source, "record.pdf");

        db.clear().unwrap();
        assert!(db.load_session::<String>().unwrap().is_none());
        let stats = db.get_stats().unwrap();
        assert_eq!(stats.vector_count + stats.content_count + stats.page_count, 0);
    }

    #[test]
    fn test_blob_round_trip() {
        let embedding = vec![0.1f32, -3.5, 42.0];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&embedding)), embedding);
    }
}
