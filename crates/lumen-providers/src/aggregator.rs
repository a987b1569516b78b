// Aggregator (cloud) adapter: HTTP POST to a chat/completions
// endpoint with SSE streaming, emitting a final chunk carrying usage-derived
// (input_tokens, output_tokens, cost) from the provider's reported price.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use lumen_core::error::{PipelineError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::types::{
    ChatChunk, ChatContentPart, ChatMessage, ChatMessageContent, ChatProvider, ChatRequest,
    ChatResponseStream, ChatRole,
};

/// Per-1k-token price for a model, used to compute `ChatChunk.cost` from
/// the usage the provider reports at stream end.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
}

/// Cloud SSE adapter, speaking an OpenAI-compatible chat/completions wire
/// format.
pub struct Aggregator {
    client: Client,
    api_url: String,
    api_key: String,
    pricing: HashMap<String, ModelPricing>,
    retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            pricing: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_pricing(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.pricing.insert(model.into(), pricing);
        self
    }

    fn price_for(&self, model: &str) -> ModelPricing {
        self.pricing.get(model).copied().unwrap_or(ModelPricing {
            input_price_per_1k: 0.0,
            output_price_per_1k: 0.0,
        })
    }

    fn convert_message(msg: &ChatMessage) -> WireMessage {
        let role = match msg.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        let content = match &msg.content {
            ChatMessageContent::Text(text) => WireContent::Text(text.clone()),
            ChatMessageContent::Parts(parts) => {
                WireContent::Parts(parts.iter().map(Self::convert_part).collect())
            }
        };
        WireMessage {
            role: role.to_string(),
            content,
        }
    }

    fn convert_part(part: &ChatContentPart) -> WirePart {
        match part {
            ChatContentPart::Text { text } => WirePart::Text { text: text.clone() },
            ChatContentPart::Image { url } => WirePart::ImageUrl {
                image_url: WireUrl { url: url.clone() },
            },
            ChatContentPart::InputAudio { data_base64, format } => WirePart::InputAudio {
                input_audio: WireAudio {
                    data: data_base64.clone(),
                    format: format.clone(),
                },
            },
        }
    }
}

#[async_trait]
impl ChatProvider for Aggregator {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatResponseStream> {
        let wire_messages: Vec<WireMessage> =
            request.messages.iter().map(Self::convert_message).collect();
        let wire_request = WireRequest {
            model: request.model.clone(),
            messages: wire_messages,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let api_url = self.api_url.clone();
        let api_key = self.api_key.clone();
        let client = self.client.clone();
        let body = serde_json::to_vec(&wire_request)
            .map_err(|e| PipelineError::provider(format!("encoding request: {e}")))?;

        // retry governs only the connect phase; once bytes start streaming
        // downstream, this must not retry.
        let response = self
            .retry
            .retry_connect(move || {
                let client = client.clone();
                let api_url = api_url.clone();
                let api_key = api_key.clone();
                let body = body.clone();
                async move {
                    client
                        .post(&api_url)
                        .header("Authorization", format!("Bearer {api_key}"))
                        .header("Content-Type", "application/json")
                        .body(body)
                        .send()
                        .await
                }
            })
            .await
            .map_err(|e| PipelineError::provider(format!("connecting to provider: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::provider(format!(
                "aggregator error ({status}): {text}"
            )));
        }

        let model = request.model.clone();
        let pricing = self.price_for(&model);
        let event_stream = response.bytes_stream().eventsource();
        let total_prompt_tokens = Arc::new(Mutex::new(0u32));
        let total_completion_tokens = Arc::new(Mutex::new(0u32));

        let chunks: ChatResponseStream = Box::pin(event_stream.map(move |result| {
            let prompt_tokens = Arc::clone(&total_prompt_tokens);
            let completion_tokens = Arc::clone(&total_completion_tokens);

            match result {
                Err(e) => ChatChunk::error(format!("stream transport error: {e}")),
                Ok(event) if event.data == "[DONE]" => {
                    let input_tokens = *prompt_tokens.lock().unwrap();
                    let output_tokens = *completion_tokens.lock().unwrap();
                    let cost = (input_tokens as f64 / 1000.0) * pricing.input_price_per_1k
                        + (output_tokens as f64 / 1000.0) * pricing.output_price_per_1k;
                    ChatChunk::final_usage(input_tokens, output_tokens, cost)
                }
                Ok(event) => match serde_json::from_str::<WireStreamChunk>(&event.data) {
                    Ok(parsed) => {
                        if let Some(usage) = parsed.usage {
                            *prompt_tokens.lock().unwrap() = usage.prompt_tokens;
                            *completion_tokens.lock().unwrap() = usage.completion_tokens;
                        }
                        let delta = parsed
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.clone())
                            .unwrap_or_default();
                        if !delta.is_empty() {
                            *completion_tokens.lock().unwrap() += 1;
                        }
                        ChatChunk::delta(delta)
                    }
                    Err(e) => ChatChunk::error(format!("malformed stream event: {e}")),
                },
            }
        }));

        Ok(chunks)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireUrl },
    InputAudio { input_audio: WireAudio },
}

#[derive(Debug, Serialize)]
struct WireUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct WireAudio {
    data: String,
    format: String,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(Debug, Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_falls_back_to_zero_for_unknown_model() {
        let aggregator = Aggregator::new("http://example", "key");
        let price = aggregator.price_for("unknown-model");
        assert_eq!(price.input_price_per_1k, 0.0);
        assert_eq!(price.output_price_per_1k, 0.0);
    }

    #[test]
    fn pricing_uses_registered_value() {
        let aggregator = Aggregator::new("http://example", "key").with_pricing(
            "gpt-4o",
            ModelPricing {
                input_price_per_1k: 0.005,
                output_price_per_1k: 0.015,
            },
        );
        let price = aggregator.price_for("gpt-4o");
        assert_eq!(price.input_price_per_1k, 0.005);
    }
}
