//! The currently ingested document
//!
//! A [`Session`] is built by a successful upload and replaced by the next one. It
//! holds what the summary path and the CLI need without re-reading the PDF, and is
//! persisted next to the index so a later process can pick it up.

use crate::error::Result;
use crate::storage::database::Database;
use crate::text::pdf::Page;
use crate::vision::describer::ImageDescription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Counters reported by an upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub pages: usize,
    pub images: usize,
    pub captions: usize,
    pub text_chunks: usize,
    pub image_chunks: usize,
    /// Seconds spent in the whole pipeline
    pub processing_time: f64,
}

/// State of one ingested document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub source: PathBuf,
    /// Stored in the `pages` table, not in the session record
    #[serde(skip)]
    pub pages: Vec<Page>,
    /// Extracted image files
    pub images: Vec<PathBuf>,
    pub captions: Vec<ImageDescription>,
    pub ingested_at: DateTime<Utc>,
    pub stats: IngestStats,
}

impl Session {
    /// Write the session to `database`, replacing any previous one
    pub fn persist(&self, database: &mut Database) -> Result<()> {
        database.save_session(&self.pages, self)
    }

    /// Session persisted by an earlier upload, if any
    pub fn restore(database: &Database) -> Result<Option<Self>> {
        Ok(database
            .load_session::<Session>()?
            .map(|(pages, mut session)| {
                session.pages = pages;
                session
            }))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_and_restore() {
        let mut db = Database::memory().unwrap();
        let session = Session {
            source: PathBuf::from("uploads/record.pdf"),
            pages: vec![
                Page { index: 1, text: "A".to_string() },
                Page { index: 2, text: "B".to_string() },
            ],
            images: vec![PathBuf::from("extracted_images/image_2_1.png")],
            captions: vec![ImageDescription {
                image_ref: "image_2_1.png".to_string(),
                page_index: 2,
                caption: "a red circle".to_string(),
            }],
            ingested_at: Utc::now(),
            stats: IngestStats {
                pages: 2,
                images: 1,
                captions: 1,
                text_chunks: 2,
                image_chunks: 1,
                processing_time: 0.5,
            },
        };

        session.persist(&mut db).unwrap();
        let restored = Session::restore(&db).unwrap().unwrap();

        assert_eq!(restored, session);
        assert_eq!(restored.page_count(), 2);
    }

    #[test]
    fn test_restore_without_session() {
        let db = Database::memory().unwrap();
        assert!(Session::restore(&db).unwrap().is_none());
    }
}
