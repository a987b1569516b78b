//! In-process topic exchange keyed by channel string (`job:<id>`,
//! `lecture:<id>`, `chat:<id>`, `upload:<id>`). Bounded per-subscriber
//! buffers, non-blocking publish with drop-on-full.
//!
//! Built on `tokio::sync::mpsc`, the channel primitive used throughout
//! this crate's async code.

use std::collections::HashMap;
use std::sync::Arc;

use lumen_core::job::JobUpdate;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

/// Capacity of each subscriber's bounded buffer.
pub const SUBSCRIBER_BUFFER_CAPACITY: usize = 10;

/// The event kinds the bus carries, matching the WebSocket fan-out's event
/// type mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    #[serde(rename = "job:progress")]
    JobProgress(JobUpdate),
    #[serde(rename = "chat:token")]
    ChatToken { text: String },
    #[serde(rename = "chat:complete")]
    ChatComplete,
    #[serde(rename = "chat:error")]
    ChatError { message: String },
    #[serde(rename = "upload:progress")]
    UploadProgress { progress: i32 },
}

pub type Receiver = mpsc::Receiver<BusEvent>;

/// A live subscription: holds the receiving half and the key it was
/// registered under so it can unsubscribe itself when dropped.
pub struct Subscription {
    channel: String,
    rx: Receiver,
    bus: ProgressBus,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receives the next event, or `None` once the bus has dropped this
    /// subscriber's sender (which only happens on explicit unsubscribe).
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // best-effort: client-held subscriptions are destroyed on
        // disconnect; the bus is cleaned up lazily (see Unsubscribe).
        let bus = self.bus.clone();
        let channel = self.channel.clone();
        tokio::spawn(async move {
            bus.purge_closed(&channel).await;
        });
    }
}

struct Subscriber {
    tx: mpsc::Sender<BusEvent>,
}

/// In-process publish/subscribe exchange. Cheap to clone — internally an
/// `Arc<RwLock<...>>`, with the publish path read-locked and drop-on-full.
#[derive(Clone, Default)]
pub struct ProgressBus {
    inner: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bounded buffer and registers it under `channel`.
    pub async fn subscribe(&self, channel: impl Into<String>) -> Subscription {
        let channel = channel.into();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER_CAPACITY);
        self.inner
            .write()
            .await
            .entry(channel.clone())
            .or_default()
            .push(Subscriber { tx });
        Subscription {
            channel,
            rx,
            bus: self.clone(),
        }
    }

    /// Publishes to every subscriber registered under `channel`.
    /// Non-blocking: if a subscriber's buffer is full the event is dropped
    /// for that subscriber only. Never fails.
    pub async fn publish(&self, channel: &str, event: BusEvent) {
        let subscribers = self.inner.read().await;
        let Some(subs) = subscribers.get(channel) else {
            return;
        };
        for sub in subs {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(channel, "subscriber buffer full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // dropped on next purge_closed pass
                }
            }
        }
    }

    /// Removes all subscribers with a closed sender under `channel`. Called
    /// lazily when a `Subscription` drops; publish also tolerates closed
    /// senders so this is cleanup, not a correctness requirement.
    async fn purge_closed(&self, channel: &str) {
        let mut subscribers = self.inner.write().await;
        if let Some(subs) = subscribers.get_mut(channel) {
            subs.retain(|s| !s.tx.is_closed());
            if subs.is_empty() {
                subscribers.remove(channel);
            }
        }
    }

    /// Number of live subscribers on a channel. Exposed for tests.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .read()
            .await
            .get(channel)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

pub fn channel_key_job(id: impl std::fmt::Display) -> String {
    format!("job:{id}")
}

pub fn channel_key_lecture(id: impl std::fmt::Display) -> String {
    format!("lecture:{id}")
}

pub fn channel_key_chat(id: impl std::fmt::Display) -> String {
    format!("chat:{id}")
}

pub fn channel_key_upload(id: impl std::fmt::Display) -> String {
    format!("upload:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> JobUpdate {
        JobUpdate {
            id: uuid::Uuid::now_v7(),
            status: lumen_core::job::JobStatus::Running,
            progress: 50,
            message: None,
            metadata: None,
            error: None,
            result: None,
            input_tokens: 0,
            output_tokens: 0,
            estimated_cost: 0.0,
        }
    }

    #[tokio::test]
    async fn publish_delivers_in_order_to_subscriber() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe("job:1").await;
        for i in 0..5 {
            let mut update = sample_update();
            update.progress = i;
            bus.publish("job:1", BusEvent::JobProgress(update)).await;
        }
        for i in 0..5 {
            match sub.recv().await.unwrap() {
                BusEvent::JobProgress(u) => assert_eq!(u.progress, i),
                _ => panic!("unexpected event"),
            }
        }
    }

    #[tokio::test]
    async fn publish_to_unknown_channel_is_a_no_op() {
        let bus = ProgressBus::new();
        // no subscribers registered; must not panic or block
        bus.publish("job:missing", BusEvent::ChatComplete).await;
    }

    #[tokio::test]
    async fn full_buffer_drops_without_blocking_publisher() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe("job:2").await;
        // buffer capacity is 10; publish a burst well beyond it
        for i in 0..1000u32 {
            let mut update = sample_update();
            update.progress = (i % 100) as i32;
            bus.publish("job:2", BusEvent::JobProgress(update)).await;
        }
        // the subscriber never read, so only the first CAPACITY events (or
        // fewer, if the mpsc internal buffering differs) are retained, and
        // receiving never blocks the publisher (the loop above completed).
        let mut received = 0;
        while sub.rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received <= SUBSCRIBER_BUFFER_CAPACITY);
    }

    #[tokio::test]
    async fn unsubscribe_removes_registration() {
        let bus = ProgressBus::new();
        let sub = bus.subscribe("job:3").await;
        assert_eq!(bus.subscriber_count("job:3").await, 1);
        drop(sub);
        // purge runs on a spawned task; give it a scheduling slot
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(bus.subscriber_count("job:3").await, 0);
    }
}
