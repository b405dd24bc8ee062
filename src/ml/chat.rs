//! Chat-completion capability
//!
//! A [`ChatModel`] accepts role-tagged messages whose content may mix text and
//! inline images, and returns one text completion. [`OpenAiChatModel`] speaks the
//! OpenAI chat API, which Groq, Ollama and most vision providers also expose.

use crate::config::LlmConfig;
use crate::error::{MedragError, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::{Client, config::OpenAIConfig};
use std::future::Future;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
}

/// One piece of message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// `data:` URL or remote URL of an image
    ImageUrl(String),
}

/// A role-tagged message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    /// Append an image to the message
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.content.push(ContentPart::ImageUrl(url.into()));
        self
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::ImageUrl(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Image URLs attached to the message
    pub fn images(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ImageUrl(url) => Some(url.as_str()),
                ContentPart::Text(_) => None,
            })
            .collect()
    }
}

/// Text and vision completion provider
pub trait ChatModel: Send + Sync {
    fn complete(&self, messages: Vec<ChatMessage>) -> impl Future<Output = Result<String>> + Send;
}

/// Chat model behind an OpenAI-compatible endpoint
pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(MedragError::Config("missing chat model name".to_string()));
        }
        if config.api_key.is_empty() {
            log::warn!("No API key configured for {}; requests may be rejected", config.base_url);
        }

        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(config.base_url.trim_end_matches('/'));

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn convert(message: ChatMessage) -> Result<ChatCompletionRequestMessage> {
        match message.role {
            Role::User => {
                let content = match message.content.as_slice() {
                    [ContentPart::Text(text)] => {
                        ChatCompletionRequestUserMessageContent::Text(text.clone())
                    }
                    parts => {
                        let mut converted = Vec::with_capacity(parts.len());
                        for part in parts {
                            converted.push(Self::convert_part(part)?);
                        }
                        ChatCompletionRequestUserMessageContent::Array(converted)
                    }
                };
                Ok(ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage {
                        content,
                        name: None,
                    },
                ))
            }
        }
    }

    fn convert_part(part: &ContentPart) -> Result<ChatCompletionRequestUserMessageContentPart> {
        let converted = match part {
            ContentPart::Text(text) => ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(text.as_str())
                    .build()?,
            ),
            ContentPart::ImageUrl(url) => ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(ImageUrlArgs::default().url(url.as_str()).build()?)
                    .build()?,
            ),
        };
        Ok(converted)
    }
}

impl ChatModel for OpenAiChatModel {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let messages = messages
            .into_iter()
            .map(Self::convert)
            .collect::<Result<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| {
                log::error!("No content in chat response: {:?}", response);
                MedragError::Provider("No content in response".to_string())
            })?;

        Ok(content.clone())
    }
}
