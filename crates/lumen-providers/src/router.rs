// Provider Router: dispatches a chat request to the correct
// backend based on a model prefix, normalizing streaming chunks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lumen_core::error::{PipelineError, Result};
use tracing::instrument;

use crate::types::{ChatProvider, ChatRequest, ChatResponseStream};

/// Registry of adapters, keyed by the tag that prefixes routed model
/// strings (e.g. `openrouter`, `ollama`). Immutable after process start
/// (an immutable provider registration, set up once at process start).
pub struct ProviderRouter {
    adapters: HashMap<String, Arc<dyn ChatProvider>>,
    default_tag: String,
}

impl ProviderRouter {
    pub fn new(default_tag: impl Into<String>) -> Self {
        Self {
            adapters: HashMap::new(),
            default_tag: default_tag.into(),
        }
    }

    pub fn register(&mut self, tag: impl Into<String>, adapter: Arc<dyn ChatProvider>) {
        self.adapters.insert(tag.into(), adapter);
    }

    fn default_adapter(&self) -> Result<&Arc<dyn ChatProvider>> {
        self.adapters
            .get(&self.default_tag)
            .ok_or_else(|| PipelineError::unknown_provider(&self.default_tag))
    }

    /// Splits `"<tag>:<model>"` into `(tag, model)`, or returns `None` for
    /// an unprefixed model string.
    fn split_prefix(model: &str) -> Option<(&str, &str)> {
        model.split_once(':')
    }

}

#[async_trait]
impl ChatProvider for ProviderRouter {
    /// Routes the request: strips the prefix, looks up the registered
    /// adapter, rewrites `request.model` to the bare model id, and
    /// delegates. Unprefixed requests go to the default adapter. An
    /// unknown prefix always fails with `UnknownProvider` — provider
    /// selection is caller intent, not a hint, once a prefix is present.
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn chat_stream(&self, mut request: ChatRequest) -> Result<ChatResponseStream> {
        let adapter = match Self::split_prefix(&request.model) {
            Some((tag, bare_model)) if self.adapters.contains_key(tag) => {
                let adapter = self.adapters.get(tag).expect("checked above");
                request.model = bare_model.to_string();
                adapter
            }
            Some((tag, _)) => return Err(PipelineError::unknown_provider(tag)),
            None => self.default_adapter()?,
        };
        adapter.chat_stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatChunk, ChatMessage, ChatRole};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingProvider {
        calls: Arc<AtomicUsize>,
        seen_model: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl ChatProvider for RecordingProvider {
        async fn chat_stream(&self, request: ChatRequest) -> Result<ChatResponseStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_model.lock().unwrap() = Some(request.model.clone());
            Ok(Box::pin(stream::once(async { ChatChunk::delta("ok") })))
        }
    }

    fn request(model: &str) -> ChatRequest {
        ChatRequest::new(model, vec![ChatMessage::text(ChatRole::User, "hi")])
    }

    #[tokio::test]
    async fn routes_prefixed_model_to_registered_adapter_with_bare_model() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let seen_a = Arc::new(std::sync::Mutex::new(None));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let seen_b = Arc::new(std::sync::Mutex::new(None));

        let mut router = ProviderRouter::new("openrouter");
        router.register(
            "openrouter",
            Arc::new(RecordingProvider {
                calls: calls_a.clone(),
                seen_model: seen_a.clone(),
            }),
        );
        router.register(
            "ollama",
            Arc::new(RecordingProvider {
                calls: calls_b.clone(),
                seen_model: seen_b.clone(),
            }),
        );

        router.chat_stream(request("ollama:gemma:1b")).await.unwrap();

        assert_eq!(calls_a.load(Ordering::SeqCst), 0);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        assert_eq!(seen_b.lock().unwrap().as_deref(), Some("gemma:1b"));
    }

    #[tokio::test]
    async fn unprefixed_model_goes_to_default_adapter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(None));
        let mut router = ProviderRouter::new("openrouter");
        router.register(
            "openrouter",
            Arc::new(RecordingProvider {
                calls: calls.clone(),
                seen_model: seen.clone(),
            }),
        );

        router.chat_stream(request("gpt-4o-mini")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn unknown_prefix_fails() {
        let router = ProviderRouter::new("openrouter");
        let err = router
            .chat_stream(request("bogus:some-model"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownProvider(tag) if tag == "bogus"));
    }
}
