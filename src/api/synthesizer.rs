//! Answer synthesis
//!
//! Two prompt shapes: the retrieval prompt (question + retrieved texts, optionally
//! the first retrieved image) and the whole-document summary prompt, which is used
//! instead of retrieval whenever the question asks for a summary.

use crate::api::retriever::RetrievedContext;
use crate::error::{MedragError, Result};
use crate::ml::chat::{ChatMessage, ChatModel};
use crate::text::pdf::Page;
use crate::utils::{decode_base64, image_data_url};
use std::sync::Arc;

/// Leading instruction of the summary prompt
pub const SUMMARY_INSTRUCTION: &str =
    "Summarize the following medical record in a concise and clear manner:";

/// True when the question asks for a whole-document summary
pub fn is_summary_request(question: &str) -> bool {
    let question = question.to_lowercase();
    question.contains("summarize") || question.contains("summary")
}

/// Prompt text for a retrieval-backed question
pub fn build_prompt_text(question: &str, texts: &[String]) -> String {
    format!(
        "You are a medical assistant. Your task is to summarize medical records or answer questions based on the following context:\n\
         Question: {}\n\
         \n\
         Text and tables:\n\
         {}\n\
         Give short and concise response.\n",
        question,
        texts.join("\n")
    )
}

/// Single user message for a retrieval-backed question; only the first image is attached
pub fn build_prompt(question: &str, context: &RetrievedContext) -> Result<ChatMessage> {
    let message = ChatMessage::user(build_prompt_text(question, &context.texts));
    match context.images.first() {
        Some(image) => {
            let bytes = decode_base64(image)
                .map_err(|e| MedragError::Synthesis(format!("context image: {}", e)))?;
            Ok(message.with_image(image_data_url(&bytes)))
        }
        None => Ok(message),
    }
}

/// Single user message summarizing every page
pub fn build_summary_prompt(pages: &[Page]) -> Result<ChatMessage> {
    if pages.iter().all(|page| page.text.trim().is_empty()) {
        return Err(MedragError::EmptyDocument);
    }
    let body = pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ChatMessage::user(format!("{}\n{}", SUMMARY_INSTRUCTION, body)))
}

/// Builds prompts and invokes the chat model
pub struct AnswerSynthesizer<M> {
    model: Arc<M>,
}

impl<M: ChatModel> AnswerSynthesizer<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self { model }
    }

    /// Answer `question` from retrieved context
    pub async fn answer(&self, question: &str, context: &RetrievedContext) -> Result<String> {
        let message = build_prompt(question, context)?;
        log::debug!("Generated prompt: {}", message.text());
        self.invoke(message).await
    }

    /// Summarize the whole document
    pub async fn summarize(&self, pages: &[Page]) -> Result<String> {
        let message = build_summary_prompt(pages)?;
        self.invoke(message).await
    }

    async fn invoke(&self, message: ChatMessage) -> Result<String> {
        self.model
            .complete(vec![message])
            .await
            .map_err(|e| MedragError::Synthesis(e.to_string()))
    }
}
