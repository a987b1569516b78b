// Local server adapter: HTTP POST to a local generate endpoint with
// NDJSON streaming. Token counts estimated by character length when the
// server doesn't report them; cost is always zero.
//
// Follows the same "transform the raw stream into ChatChunk" shape as the
// aggregator adapter, built over `reqwest`'s chunked body reader instead
// of `eventsource-stream`.

use async_trait::async_trait;
use futures::stream;
use lumen_core::error::{PipelineError, Result};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::types::{
    ChatChunk, ChatMessage, ChatMessageContent, ChatProvider, ChatRequest, ChatResponseStream,
    ChatRole,
};

/// Characters per estimated token, used when the local server does not
/// report usage, estimated by character length.
const CHARS_PER_TOKEN_ESTIMATE: usize = 4;

pub struct LocalServer {
    client: Client,
    generate_url: String,
    retry: RetryPolicy,
}

impl LocalServer {
    pub fn new(generate_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            generate_url: generate_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    fn flatten_prompt(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                let text = match &m.content {
                    ChatMessageContent::Text(t) => t.clone(),
                    ChatMessageContent::Parts(parts) => parts
                        .iter()
                        .filter_map(|p| match p {
                            crate::types::ChatContentPart::Text { text } => Some(text.clone()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join(""),
                };
                format!("{role}: {text}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Reads the response body and splits it into NDJSON lines eagerly.
    /// A local generate endpoint's full response is small relative to an
    /// HTTP streaming cloud completion, so buffering once keeps this
    /// adapter simple; each line still becomes its own `ChatChunk` so
    /// callers see the same incremental shape as the aggregator.
    async fn read_lines(response: Response) -> Result<Vec<String>> {
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::provider(format!("reading local server body: {e}")))?;
        Ok(body.lines().filter(|l| !l.trim().is_empty()).map(String::from).collect())
    }
}

#[async_trait]
impl ChatProvider for LocalServer {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatResponseStream> {
        let wire_request = WireRequest {
            model: request.model.clone(),
            prompt: Self::flatten_prompt(&request.messages),
            max_tokens: request.max_tokens,
        };
        let body = serde_json::to_vec(&wire_request)
            .map_err(|e| PipelineError::provider(format!("encoding request: {e}")))?;

        let client = self.client.clone();
        let url = self.generate_url.clone();
        let response = self
            .retry
            .retry_connect(move || {
                let client = client.clone();
                let url = url.clone();
                let body = body.clone();
                async move {
                    client
                        .post(&url)
                        .header("Content-Type", "application/json")
                        .body(body)
                        .send()
                        .await
                }
            })
            .await
            .map_err(|e| PipelineError::provider(format!("connecting to local server: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::provider(format!(
                "local server error ({status}): {text}"
            )));
        }

        let lines = Self::read_lines(response).await?;
        let mut chunks = Vec::with_capacity(lines.len() + 1);
        let mut input_chars = 0usize;
        let mut output_chars = 0usize;

        for line in &lines {
            match serde_json::from_str::<WireLine>(line) {
                Ok(parsed) => {
                    if parsed.done {
                        break;
                    }
                    output_chars += parsed.text.len();
                    chunks.push(ChatChunk::delta(parsed.text));
                }
                Err(e) => {
                    chunks.push(ChatChunk::error(format!("malformed NDJSON line: {e}")));
                    return Ok(Box::pin(stream::iter(chunks)));
                }
            }
        }
        input_chars += wire_request_prompt_len(&request);

        let input_tokens = (input_chars / CHARS_PER_TOKEN_ESTIMATE).max(1) as u32;
        let output_tokens = (output_chars / CHARS_PER_TOKEN_ESTIMATE).max(1) as u32;
        chunks.push(ChatChunk::final_usage(input_tokens, output_tokens, 0.0));

        Ok(Box::pin(stream::iter(chunks)))
    }
}

fn wire_request_prompt_len(request: &ChatRequest) -> usize {
    request
        .messages
        .iter()
        .map(|m| match &m.content {
            ChatMessageContent::Text(t) => t.len(),
            ChatMessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    crate::types::ChatContentPart::Text { text } => text.len(),
                    _ => 0,
                })
                .sum(),
        })
        .sum()
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireLine {
    #[serde(default)]
    text: String,
    #[serde(default)]
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_text_only_messages_into_a_prompt() {
        let messages = vec![
            ChatMessage::text(ChatRole::System, "be terse"),
            ChatMessage::text(ChatRole::User, "hello"),
        ];
        let prompt = LocalServer::flatten_prompt(&messages);
        assert_eq!(prompt, "system: be terse\nuser: hello");
    }
}
