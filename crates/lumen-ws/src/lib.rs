//! WebSocket Fan-out: one task per connection, forwarding whatever
//! the connection is subscribed to on the Progress Bus and accepting
//! inbound `{type: "subscribe"|"unsubscribe", channel}` frames. Connection
//! identity/authentication is established by the caller (an external
//! collaborator per this repository's scope) and passed in already resolved.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use lumen_bus::{BusEvent, ProgressBus};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Heartbeat cadence: a ping is sent every 30 s.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A connection that hasn't ponged in this long is considered dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

/// Re-shapes a bus event into the wire envelope `{type, payload}`.
/// `BusEvent`'s own internally-tagged serialization already carries a
/// `type` key per variant; this lifts that key out to the envelope level
/// and nests everything else under `payload`.
fn to_wire_frame(event: &BusEvent) -> serde_json::Value {
    let mut value = serde_json::to_value(event).expect("BusEvent always serializes");
    let object = value.as_object_mut().expect("BusEvent serializes as an object");
    let event_type = object.remove("type").unwrap_or(serde_json::Value::Null);
    serde_json::json!({ "type": event_type, "payload": object })
}

/// One channel's forwarding task: reads from its bus subscription and
/// forwards tagged events into the connection's single outbound channel.
struct ForwardedSubscription {
    task: JoinHandle<()>,
}

impl Drop for ForwardedSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drives one upgraded WebSocket connection to completion. `identity` is
/// logged only; this core has no session concept of its own.
#[instrument(skip(socket, bus), fields(identity = %identity))]
pub async fn handle_connection(mut socket: WebSocket, bus: ProgressBus, identity: String) {
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel::<BusEvent>(32);
    let mut subscriptions: HashMap<String, ForwardedSubscription> = HashMap::new();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately; consume it
    let mut awaiting_pong = false;
    let mut missed_deadline = Box::pin(tokio::time::sleep(PONG_TIMEOUT));

    loop {
        tokio::select! {
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound_text(&text, &bus, &outbound_tx, &mut subscriptions).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                        missed_deadline.as_mut().reset(tokio::time::Instant::now() + PONG_TIMEOUT);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket recv error, closing connection");
                        break;
                    }
                }
            }
            Some(event) = outbound_rx.recv() => {
                let frame = to_wire_frame(&event);
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
                missed_deadline.as_mut().reset(tokio::time::Instant::now() + PONG_TIMEOUT);
            }
            _ = &mut missed_deadline, if awaiting_pong => {
                debug!("pong timeout, closing connection");
                break;
            }
        }
    }

    // drop unsubscribes every held channel (ForwardedSubscription::drop
    // aborts the forwarding task, whose Subscription then drops too).
    subscriptions.clear();
}

async fn handle_inbound_text(
    text: &str,
    bus: &ProgressBus,
    outbound_tx: &tokio::sync::mpsc::Sender<BusEvent>,
    subscriptions: &mut HashMap<String, ForwardedSubscription>,
) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "ignoring malformed inbound frame");
            return;
        }
    };

    match frame {
        InboundFrame::Subscribe { channel } => {
            if subscriptions.contains_key(&channel) {
                return;
            }
            let mut subscription = bus.subscribe(channel.clone()).await;
            let tx = outbound_tx.clone();
            let task = tokio::spawn(async move {
                while let Some(event) = subscription.recv().await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            subscriptions.insert(channel, ForwardedSubscription { task });
        }
        InboundFrame::Unsubscribe { channel } => {
            subscriptions.remove(&channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::job::{JobStatus, JobUpdate};
    use uuid::Uuid;

    #[test]
    fn wire_frame_lifts_type_tag_to_envelope() {
        let event = BusEvent::ChatToken {
            text: "hello".to_string(),
        };
        let frame = to_wire_frame(&event);
        assert_eq!(frame["type"], "chat:token");
        assert_eq!(frame["payload"]["text"], "hello");
    }

    #[test]
    fn wire_frame_handles_job_progress() {
        let update = JobUpdate {
            id: Uuid::now_v7(),
            status: JobStatus::Running,
            progress: 42,
            message: None,
            metadata: None,
            error: None,
            result: None,
            input_tokens: 0,
            output_tokens: 0,
            estimated_cost: 0.0,
        };
        let frame = to_wire_frame(&BusEvent::JobProgress(update));
        assert_eq!(frame["type"], "job:progress");
        assert_eq!(frame["payload"]["progress"], 42);
    }

    #[test]
    fn inbound_subscribe_frame_parses() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"subscribe","channel":"job:abc"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Subscribe { channel } if channel == "job:abc"));
    }
}
