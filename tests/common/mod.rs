//! Shared fixtures: generated PDFs, an in-process chat model and a counting embedder

#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use medrag::config::Config;
use medrag::error::{MedragError, Result};
use medrag::ml::chat::{ChatMessage, ChatModel};
use medrag::ml::embedding::{Embedding, EmbeddingProvider};
use medrag::storage::Database;
use medrag::vision::DESCRIBE_INSTRUCTION;
use medrag::RagService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bytes that start like a JPEG; only written and read back, never decoded
pub const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

/// Canned answer for every non-caption request
pub const MOCK_ANSWER: &str = "mock answer";

/// One page of a generated PDF
pub struct TestPage<'a> {
    pub text: &'a str,
    pub images: Vec<&'a [u8]>,
}

impl<'a> TestPage<'a> {
    pub fn text(text: &'a str) -> Self {
        Self {
            text,
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, jpeg: &'a [u8]) -> Self {
        self.images.push(jpeg);
        self
    }
}

/// Write a PDF with one text line per page and DCT-encoded image XObjects
pub fn write_pdf(path: &Path, pages: &[TestPage<'_>]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let shared_resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page_def in pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(page_def.text)]),
            Operation::new("ET", vec![]),
        ];

        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        };

        if !page_def.images.is_empty() {
            let mut xobjects = lopdf::Dictionary::new();
            for (i, bytes) in page_def.images.iter().enumerate() {
                let image = Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => 1,
                        "Height" => 1,
                        "ColorSpace" => "DeviceRGB",
                        "BitsPerComponent" => 8,
                        "Filter" => "DCTDecode",
                    },
                    bytes.to_vec(),
                );
                let name = format!("Im{}", i + 1);
                xobjects.set(name.as_bytes().to_vec(), doc.add_object(image));
                operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
            }
            page.set(
                "Resources",
                dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                    "XObject" => xobjects,
                },
            );
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode page content"),
        ));
        page.set("Contents", content_id);
        kids.push(doc.add_object(page).into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => shared_resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save test pdf");
}

/// What the mock model has seen
#[derive(Default)]
pub struct MockState {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<ChatMessage>>,
    pub caption: Mutex<String>,
    pub fail_captions: Mutex<bool>,
}

impl MockState {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> ChatMessage {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("model was never called")
    }

    pub fn set_caption(&self, caption: &str) {
        *self.caption.lock().unwrap() = caption.to_string();
    }

    pub fn fail_captions(&self) {
        *self.fail_captions.lock().unwrap() = true;
    }
}

/// Captions images with a fixed caption and answers everything else with [`MOCK_ANSWER`]
pub struct MockModel {
    state: Arc<MockState>,
}

impl MockModel {
    pub fn new(caption: &str) -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        state.set_caption(caption);
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

impl ChatModel for MockModel {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let message = messages.into_iter().next_back().expect("at least one message");
        let is_caption = message.text() == DESCRIBE_INSTRUCTION && !message.images().is_empty();
        self.state.requests.lock().unwrap().push(message);

        if is_caption {
            if *self.state.fail_captions.lock().unwrap() {
                return Err(MedragError::Provider("rate limited".to_string()));
            }
            return Ok(self.state.caption.lock().unwrap().clone());
        }
        Ok(MOCK_ANSWER.to_string())
    }
}

pub const TEST_DIMENSION: usize = 256;

/// Word-hashing embedder that counts query embeddings; shared words mean nearby vectors
pub struct CountingEmbedder {
    pub queries: Arc<AtomicUsize>,
}

impl CountingEmbedder {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let queries = Arc::new(AtomicUsize::new(0));
        (
            Self {
                queries: queries.clone(),
            },
            queries,
        )
    }

    fn encode(text: &str) -> Embedding {
        let mut embedding = vec![0.0f32; TEST_DIMENSION];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
                    (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
                });
            embedding[(hash % TEST_DIMENSION as u64) as usize] += 1.0;
        }
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-12 {
            embedding.iter_mut().for_each(|x| *x /= norm);
        }
        embedding
    }
}

impl EmbeddingProvider for CountingEmbedder {
    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|text| Self::encode(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(Self::encode(text))
    }
}

/// Configuration rooted in `dir`, with captioning ungated
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.index_path = dir.join("index.db");
    config.storage.image_dir = dir.join("images");
    config.captioning.interval_ms = 0;
    config.embedding.dimension = TEST_DIMENSION;
    config
}

/// Everything a pipeline test needs to observe
pub struct Harness {
    pub service: RagService<MockModel, CountingEmbedder>,
    pub model: Arc<MockState>,
    pub queries: Arc<AtomicUsize>,
}

impl Harness {
    pub fn open(config: Config, caption: &str) -> Self {
        let (model, state) = MockModel::new(caption);
        let (embedder, queries) = CountingEmbedder::new();
        let database = Database::new(&config.storage.index_path).unwrap();
        let service = RagService::new(config, model, embedder, database).unwrap();
        Self {
            service,
            model: state,
            queries,
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

pub fn pdf_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// Every file under `root`, sorted
pub fn image_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
