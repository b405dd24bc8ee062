//! Text normalization and tokenization
//!
//! Chunk budgets are measured in tokens of the target LLM. When a Hugging Face
//! `tokenizer.json` is available it is used directly; otherwise every run of
//! non-whitespace characters counts as one token.

use crate::error::{MedragError, Result};
use regex::Regex;
use std::path::Path;
use tokenizers::Tokenizer;
use unicode_normalization::UnicodeNormalization;

/// Byte range of one token inside the text it was produced from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

/// Text preprocessor and tokenizer
pub struct TextProcessor {
    /// Tokenizer instance
    tokenizer: Option<Tokenizer>,
    word_regex: Regex,
}

impl TextProcessor {
    /// Create a processor that falls back to whitespace tokens
    pub fn new() -> Result<Self> {
        let word_regex = Regex::new(r"\S+").map_err(|e| {
            MedragError::TextProcessing(format!("Failed to compile token regex: {}", e))
        })?;
        Ok(Self {
            tokenizer: None,
            word_regex,
        })
    }

    /// Create a processor, loading `tokenizer_path` when given
    pub fn with_tokenizer(tokenizer_path: Option<&Path>) -> Result<Self> {
        let mut processor = Self::new()?;
        if let Some(path) = tokenizer_path {
            processor.load_tokenizer(path)?;
        }
        Ok(processor)
    }

    /// Load a `tokenizer.json` file
    pub fn load_tokenizer<P: AsRef<Path>>(&mut self, tokenizer_path: P) -> Result<()> {
        let tokenizer_path = tokenizer_path.as_ref();
        if !tokenizer_path.exists() {
            log::warn!("Tokenizer file not found at {:?}", tokenizer_path);
            return Err(MedragError::TextProcessing(format!(
                "Tokenizer file not found: {}",
                tokenizer_path.display()
            )));
        }

        let mut tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            MedragError::TextProcessing(format!("Failed to load tokenizer: {}", e))
        })?;
        // Chunk budgets need every token of a page, never a model-sized prefix
        tokenizer.with_truncation(None).map_err(|e| {
            MedragError::TextProcessing(format!("Failed to disable truncation: {}", e))
        })?;
        tokenizer.with_padding(None);
        log::info!("Loaded tokenizer from {:?}", tokenizer_path);
        self.tokenizer = Some(tokenizer);
        Ok(())
    }

    /// NFC-normalize page text, drop trailing spaces per line and trim the ends
    pub fn normalize_page_text(&self, text: &str) -> String {
        let normalized = text.nfc().collect::<String>();
        normalized
            .lines()
            .map(|line| line.trim_end())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    /// Token spans of `text`, in order
    pub fn token_spans(&self, text: &str) -> Result<Vec<TokenSpan>> {
        match self.tokenizer {
            Some(ref tokenizer) => {
                let encoding = tokenizer.encode(text, false).map_err(|e| {
                    MedragError::TextProcessing(format!("Tokenization failed: {}", e))
                })?;
                Ok(encoding
                    .get_offsets()
                    .iter()
                    .filter(|(start, end)| end > start)
                    .map(|&(start, end)| TokenSpan { start, end })
                    .collect())
            }
            None => Ok(self
                .word_regex
                .find_iter(text)
                .map(|m| TokenSpan {
                    start: m.start(),
                    end: m.end(),
                })
                .collect()),
        }
    }

    /// Number of tokens in `text`
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.token_spans(text)?.len())
    }

    /// Check if real tokenizer is loaded
    pub fn has_tokenizer(&self) -> bool {
        self.tokenizer.is_some()
    }
}
