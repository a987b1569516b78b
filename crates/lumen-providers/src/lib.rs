pub mod aggregator;
pub mod local;
pub mod retry;
pub mod router;
pub mod types;

pub use aggregator::{Aggregator, ModelPricing};
pub use local::LocalServer;
pub use router::ProviderRouter;
pub use types::{
    ChatChunk, ChatContentPart, ChatMessage, ChatMessageContent, ChatProvider, ChatRequest,
    ChatResponseStream, ChatRole,
};
