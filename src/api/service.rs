//! RagService - pipeline controller
//!
//! Owns every stage and the current [`Session`]. Ingestion takes `&mut self` and
//! questions take `&self`, so a question can never observe a half-built index.
//! The `handle_*` wrappers turn outcomes into status + JSON replies for a request
//! layer.

use crate::api::retriever::Retriever;
use crate::api::session::{IngestStats, Session};
use crate::api::synthesizer::{AnswerSynthesizer, is_summary_request};
use crate::config::Config;
use crate::error::{MedragError, Result};
use crate::ml::chat::{ChatModel, OpenAiChatModel};
use crate::ml::embedding::{EmbeddingModel, EmbeddingProvider};
use crate::storage::database::{Database, IndexStats};
use crate::storage::index::{DualStoreIndex, RetrievedChunk};
use crate::text::chunking::{ChunkOrigin, SourceText, TextChunker};
use crate::text::pdf::{ExtractedDocument, PdfProcessor, retain_document_images};
use crate::utils::{decode_base64, encode_base64, is_image_file, is_supported_document};
use crate::vision::cache::{AnswerCache, CacheKey};
use crate::vision::describer::{ImageDescriber, ImageDescription};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Success message of a document upload
pub const UPLOAD_OK: &str = "PDF uploaded and processed successfully";
/// Success message of an image upload
pub const IMAGE_UPLOAD_OK: &str = "Image uploaded and processed successfully";

/// Caption of a standalone image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageCaption {
    pub image_base64: String,
    pub caption: String,
}

/// JSON body of a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReplyBody {
    Answer {
        answer: String,
    },
    Message {
        message: String,
    },
    Caption {
        message: String,
        image_base64: String,
        caption: String,
    },
    Error {
        error: String,
    },
}

/// Status code plus body, as a request handler would send it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub status: u16,
    pub body: ReplyBody,
}

impl Reply {
    pub fn answer(answer: String) -> Self {
        Self {
            status: 200,
            body: ReplyBody::Answer { answer },
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: ReplyBody::Message {
                message: message.into(),
            },
        }
    }

    pub fn error(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ReplyBody::Error {
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Serialized body
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.body)?)
    }

    fn from_query_error(error: MedragError) -> Self {
        match error {
            MedragError::InvalidRequest(message) => Reply::error(400, message),
            MedragError::NotInitialized => Reply::error(500, MedragError::NotInitialized.to_string()),
            MedragError::EmptyDocument => Reply::error(404, MedragError::EmptyDocument.to_string()),
            MedragError::Retrieval(reason) => {
                log::warn!("Retrieval failed: {}", reason);
                Reply::error(404, "No relevant context found")
            }
            other => {
                log::error!("Error in ask_question: {}", other);
                Reply::error(500, "Failed to process question")
            }
        }
    }
}

/// The ingestion and question-answering pipeline
pub struct RagService<M, E> {
    config: Config,
    extractor: PdfProcessor,
    describer: ImageDescriber<M>,
    chunker: TextChunker,
    index: DualStoreIndex<E>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer<M>,
    cache: AnswerCache,
    session: Option<Session>,
}

impl RagService<OpenAiChatModel, EmbeddingModel> {
    /// Build the pipeline against the configured providers and index file
    pub fn from_config(config: Config) -> Result<Self> {
        let model = OpenAiChatModel::new(&config.llm)?;
        let embedder = EmbeddingModel::from_config(&config.embedding, &config.llm.api_key)?;
        let database = Database::new(&config.storage.index_path)?;
        Self::new(config, model, embedder, database)
    }
}

impl<M: ChatModel, E: EmbeddingProvider> RagService<M, E> {
    /// Assemble the pipeline; a session persisted in `database` is restored
    pub fn new(config: Config, model: M, embedder: E, database: Database) -> Result<Self> {
        config.validate()?;
        let model = Arc::new(model);

        let session = Session::restore(&database)?;
        if let Some(session) = &session {
            log::info!(
                "Restored session for {} ({} pages)",
                session.source.display(),
                session.page_count()
            );
        }

        Ok(Self {
            extractor: PdfProcessor::new()?,
            describer: ImageDescriber::new(model.clone(), &config.captioning),
            chunker: TextChunker::new(config.chunking.clone())?,
            index: DualStoreIndex::new(database, embedder, &config.retrieval),
            retriever: Retriever::new(&config),
            synthesizer: AnswerSynthesizer::new(model),
            cache: AnswerCache::new(config.cache.capacity),
            session,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.index.stats()
    }

    /// Raw index hits for `query`, without synthesis
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.index.retrieve(validate_question(query)?, None).await
    }

    /// Extract, caption, chunk and index a PDF, replacing the current session
    pub async fn upload<P: AsRef<Path>>(&mut self, path: P) -> Result<IngestStats> {
        let path = path.as_ref();
        if !is_supported_document(path) {
            return Err(MedragError::InvalidRequest(format!(
                "Unsupported document type: {}",
                path.display()
            )));
        }

        let start = Instant::now();
        log::info!("📄 Processing {}", path.display());

        let document = self
            .extractor
            .extract(path, &self.config.storage.image_dir)?;
        let captions = self.describer.describe_batch(&document.images).await;

        let (page_sources, caption_sources) = build_sources(&document, &captions);
        let text_chunks = self.chunker.split_documents(&page_sources)?;
        let image_chunks = self.chunker.split_documents(&caption_sources)?;

        // The previous session is gone from here on, whatever happens next
        self.session = None;
        if self.config.storage.clear_on_ingest {
            self.index.clear()?;
            retain_document_images(&self.config.storage.image_dir, &document.key)?;
        }
        self.index.index(&text_chunks).await?;
        self.index.index(&image_chunks).await?;

        let stats = IngestStats {
            pages: document.pages.len(),
            images: document.images.len(),
            captions: captions.len(),
            text_chunks: text_chunks.len(),
            image_chunks: image_chunks.len(),
            processing_time: start.elapsed().as_secs_f64(),
        };

        let session = Session {
            source: document.source,
            pages: document.pages,
            images: document.images.into_iter().map(|image| image.path).collect(),
            captions,
            ingested_at: chrono::Utc::now(),
            stats: stats.clone(),
        };
        session.persist(self.index.database_mut())?;
        self.session = Some(session);

        log::info!(
            "✅ Indexed {} text chunks and {} image chunks in {:.2}s",
            stats.text_chunks,
            stats.image_chunks,
            stats.processing_time
        );
        Ok(stats)
    }

    /// Answer a question about the current document.
    ///
    /// Summary requests use every page and skip retrieval.
    pub async fn ask(&self, question: &str) -> Result<String> {
        let question = validate_question(question)?;
        let session = self.session.as_ref().ok_or(MedragError::NotInitialized)?;
        log::info!("Question received: {}", question);

        if is_summary_request(question) {
            log::debug!("Summary requested, using all {} pages", session.page_count());
            return self.synthesizer.summarize(&session.pages).await;
        }

        let context = self.retriever.retrieve(&self.index, question).await?;
        self.synthesizer.answer(question, &context).await
    }

    /// Answer a question about a supplied image, bypassing retrieval
    pub async fn ask_image(&self, question: &str, image_base64: &str) -> Result<String> {
        let question = validate_question(question)?;
        let image = decode_base64(image_base64)?;
        if image.is_empty() {
            return Err(MedragError::InvalidRequest("No image provided".to_string()));
        }

        let key = CacheKey::new(question, &image);
        if let Some(answer) = self.cache.get(&key) {
            log::debug!("Image answer served from cache");
            return Ok(answer);
        }

        let answer = self
            .describer
            .describe_bytes(&image, question)
            .await
            .map_err(|e| MedragError::Synthesis(e.to_string()))?;
        self.cache.put(key, answer.clone());
        Ok(answer)
    }

    /// Caption a standalone image file with the indexing instruction
    pub async fn describe_image_file<P: AsRef<Path>>(&self, path: P) -> Result<ImageCaption> {
        let path = path.as_ref();
        if !is_image_file(path) {
            return Err(MedragError::InvalidRequest(format!(
                "Unsupported image type: {}",
                path.display()
            )));
        }

        let bytes = std::fs::read(path)?;
        let caption = self
            .describer
            .describe_bytes(&bytes, self.describer.instruction())
            .await?;
        Ok(ImageCaption {
            image_base64: encode_base64(&bytes),
            caption,
        })
    }

    /// Upload boundary: never fails, reports status instead
    pub async fn handle_upload<P: AsRef<Path>>(&mut self, path: Option<P>) -> Reply {
        let Some(path) = path else {
            return Reply::error(400, "No file uploaded");
        };
        match self.upload(path).await {
            Ok(_) => Reply::message(UPLOAD_OK),
            Err(MedragError::InvalidRequest(message)) => Reply::error(400, message),
            Err(e) => {
                log::error!("Error processing document: {}", e);
                Reply::error(500, "Failed to process document")
            }
        }
    }

    /// Image upload boundary
    pub async fn handle_image_upload<P: AsRef<Path>>(&self, path: Option<P>) -> Reply {
        let Some(path) = path else {
            return Reply::error(400, "No file uploaded");
        };
        match self.describe_image_file(path).await {
            Ok(ImageCaption {
                image_base64,
                caption,
            }) => Reply {
                status: 200,
                body: ReplyBody::Caption {
                    message: IMAGE_UPLOAD_OK.to_string(),
                    image_base64,
                    caption,
                },
            },
            Err(MedragError::InvalidRequest(message)) => Reply::error(400, message),
            Err(e) => {
                log::error!("Error processing image: {}", e);
                Reply::error(500, "Failed to process image")
            }
        }
    }

    /// Text question boundary
    pub async fn handle_question(&self, question: Option<&str>) -> Reply {
        let Some(question) = question.filter(|q| !q.trim().is_empty()) else {
            return Reply::error(400, "No question provided");
        };
        match self.ask(question).await {
            Ok(answer) => Reply::answer(answer),
            Err(e) => Reply::from_query_error(e),
        }
    }

    /// Image question boundary; without an image the text path answers
    pub async fn handle_image_question(
        &self,
        question: Option<&str>,
        image_base64: Option<&str>,
    ) -> Reply {
        let Some(question) = question.filter(|q| !q.trim().is_empty()) else {
            return Reply::error(400, "No question provided");
        };
        let result = match image_base64.filter(|image| !image.trim().is_empty()) {
            Some(image) => self.ask_image(question, image).await,
            None => self.ask(question).await,
        };
        match result {
            Ok(answer) => Reply::answer(answer),
            Err(e) => Reply::from_query_error(e),
        }
    }
}

fn validate_question(question: &str) -> Result<&str> {
    let question = question.trim();
    if question.is_empty() {
        return Err(MedragError::InvalidRequest("No question provided".to_string()));
    }
    Ok(question)
}

/// Chunker inputs for page texts and image captions
fn build_sources(
    document: &ExtractedDocument,
    captions: &[ImageDescription],
) -> (Vec<SourceText>, Vec<SourceText>) {
    let pages = document
        .pages
        .iter()
        .map(|page| {
            SourceText::new(page.text.clone(), ChunkOrigin::Text { page: page.index })
                .with_metadata("source", format!("page_{}", page.index))
                .with_metadata("page", page.index.to_string())
        })
        .collect();

    let captions = captions
        .iter()
        .map(|description| {
            let stem = Path::new(&description.image_ref)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| description.image_ref.clone());
            SourceText::new(
                description.caption.clone(),
                ChunkOrigin::Image {
                    image_ref: description.image_ref.clone(),
                    page: description.page_index,
                },
            )
            .with_metadata("source", stem)
            .with_metadata("page", description.page_index.to_string())
        })
        .collect();

    (pages, captions)
}
