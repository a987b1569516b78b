// Provider-agnostic chat types: the router contract and the adapters' content-part kinds.

use futures::Stream;
use lumen_core::error::Result;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Lazy, finite, single-consumer sequence of chunks terminated by channel
/// close, the way a lazy, finite, single-consumer channel should.
pub type ChatResponseStream = Pin<Box<dyn Stream<Item = ChatChunk> + Send>>;

/// A request accepted by the Provider Router.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// May be `"<tag>:<model>"` (routed) or `"<model>"` (default adapter).
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: ChatMessageContent,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: ChatMessageContent::Text(text.into()),
        }
    }

    pub fn parts(role: ChatRole, parts: Vec<ChatContentPart>) -> Self {
        Self {
            role,
            content: ChatMessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChatMessageContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

/// The three content-part kinds the adapters support.
#[derive(Debug, Clone)]
pub enum ChatContentPart {
    Text { text: String },
    /// Image as a data URL or HTTP URL.
    Image { url: String },
    /// Base64-encoded audio with an explicit format tag (e.g. `"mp3"`, `"wav"`).
    InputAudio { data_base64: String, format: String },
}

impl ChatContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ChatContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ChatContentPart::Image { url: url.into() }
    }

    pub fn input_audio(data_base64: impl Into<String>, format: impl Into<String>) -> Self {
        ChatContentPart::InputAudio {
            data_base64: data_base64.into(),
            format: format.into(),
        }
    }
}

/// A single chunk of the streamed response. The `error` field is the
/// canonical, in-band failure signal (adapters emit `error` in
/// a chunk... not out-of-band").
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub error: Option<String>,
    /// Set on the final chunk of a successful completion.
    pub done: bool,
}

impl ChatChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn final_usage(input_tokens: u32, output_tokens: u32, cost: f64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cost,
            done: true,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            done: true,
            ..Default::default()
        }
    }
}

/// Adapters implement this single contract; the router dispatches to one by
/// model prefix.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Streaming call — the required method every adapter must implement.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatResponseStream>;

    /// Non-streaming convenience: drains the stream and concatenates text.
    /// Convenience for handlers that issue short, non-streamed calls rather
    /// than consuming the chunk stream directly.
    async fn chat(&self, request: ChatRequest) -> Result<ChatChunk> {
        use futures::StreamExt;

        let mut stream = self.chat_stream(request).await?;
        let mut text = String::new();
        let mut totals = ChatChunk::default();

        while let Some(chunk) = stream.next().await {
            if let Some(err) = chunk.error {
                return Err(lumen_core::error::PipelineError::provider(err));
            }
            text.push_str(&chunk.text);
            totals.input_tokens += chunk.input_tokens;
            totals.output_tokens += chunk.output_tokens;
            totals.cost += chunk.cost;
        }

        totals.text = text;
        totals.done = true;
        Ok(totals)
    }
}
