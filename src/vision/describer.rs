//! Image captioning with a vision-capable chat model

use crate::config::CaptionConfig;
use crate::error::{MedragError, Result};
use crate::ml::chat::{ChatMessage, ChatModel};
use crate::text::pdf::EmbeddedImage;
use crate::utils::{decode_base64, image_data_url};
use crate::vision::rate_limit::RateGate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Instruction used when captioning images for the index
pub const DESCRIBE_INSTRUCTION: &str = "Describe the image in detail.";

/// Caption of one extracted image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescription {
    /// Image path relative to the image root, `{document_key}/image_{page}_{seq}.{ext}`
    pub image_ref: String,
    pub page_index: u32,
    pub caption: String,
}

/// Turns images into text with a vision model.
///
/// Batch captioning for the index goes through a [`RateGate`]; one-off calls
/// ([`describe_bytes`](Self::describe_bytes), [`describe_base64`](Self::describe_base64))
/// are not gated.
pub struct ImageDescriber<M> {
    model: Arc<M>,
    gate: RateGate,
    instruction: String,
}

impl<M: ChatModel> ImageDescriber<M> {
    pub fn new(model: Arc<M>, config: &CaptionConfig) -> Self {
        Self::with_gate(
            model,
            RateGate::new(config.interval(), config.burst),
            config.prompt.clone(),
        )
    }

    pub fn with_gate(model: Arc<M>, gate: RateGate, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        Self {
            model,
            gate,
            instruction: if instruction.trim().is_empty() {
                DESCRIBE_INSTRUCTION.to_string()
            } else {
                instruction
            },
        }
    }

    /// Instruction used for index captions
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Ask the model `instruction` about an image
    pub async fn describe_bytes(&self, image: &[u8], instruction: &str) -> Result<String> {
        if image.is_empty() {
            return Err(MedragError::InvalidRequest("image is empty".to_string()));
        }
        let message = ChatMessage::user(instruction).with_image(image_data_url(image));
        let caption = self
            .model
            .complete(vec![message])
            .await
            .map_err(|e| MedragError::Captioning(e.to_string()))?;
        Ok(caption.trim().to_string())
    }

    /// Same as [`describe_bytes`](Self::describe_bytes) for a base64 payload
    pub async fn describe_base64(&self, image_base64: &str, instruction: &str) -> Result<String> {
        let bytes = decode_base64(image_base64)?;
        self.describe_bytes(&bytes, instruction).await
    }

    /// Caption every captionable image, in order, one gated call at a time.
    ///
    /// Images that fail or come back with an empty caption are logged and skipped.
    pub async fn describe_batch(&self, images: &[EmbeddedImage]) -> Vec<ImageDescription> {
        let mut descriptions = Vec::with_capacity(images.len());

        for image in images {
            let image_ref = image.image_ref.clone();
            if !image.format.is_captionable() {
                log::debug!("Not captioning {}: {:?} images are not sent to the model", image_ref, image.format);
                continue;
            }

            self.gate.acquire().await;
            match self.describe_bytes(&image.raw_bytes, &self.instruction).await {
                Ok(caption) if caption.is_empty() => {
                    log::warn!("Empty caption for image {}, skipping", image_ref);
                }
                Ok(caption) => {
                    log::info!("Caption generated for image {}", image_ref);
                    log::debug!("{}: {}", image_ref, caption);
                    descriptions.push(ImageDescription {
                        image_ref,
                        page_index: image.page_index,
                        caption,
                    });
                }
                Err(e) => {
                    log::warn!("Error processing image {}: {}", image_ref, e);
                }
            }
        }

        log::info!(
            "Generated {} captions for {} images",
            descriptions.len(),
            images.len()
        );
        descriptions
    }
}
