//! Cross-context message bus.
//!
//! Execution contexts (windows, workers, the service worker) talk to each
//! other over named broadcast channels. Every message carries the `clientId`
//! of the browsing client it concerns; subscribers only ever see traffic for
//! their own client. Request/response pairs are correlated by a `requestId`
//! and awaited with an explicit timeout.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Per-channel buffer. Slow subscribers past this many messages lag.
const DEFAULT_CAPACITY: usize = 256;

/// Role of a message in an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Fire-and-forget.
    #[default]
    Notify,
    Request,
    Response,
}

/// One record on the bus. Serialises as
/// `{"clientId", "for", "data", "requestId"?, "kind"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub client_id: String,
    /// Logical recipient, e.g. `"storage-get"`.
    #[serde(rename = "for")]
    pub target: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default)]
    pub kind: MessageKind,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no reply for `{target}` on channel `{channel}` within {timeout:?}")]
    Timeout {
        channel: String,
        target: String,
        timeout: Duration,
    },

    #[error("channel `{0}` closed")]
    Closed(String),
}

/// The shared bus. Cloning is cheap; clones address the same channels.
#[derive(Clone)]
pub struct MessageBus {
    channels: Arc<DashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("channels", &self.channels.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// A handle speaking for `client_id`.
    pub fn client(&self, client_id: impl Into<String>) -> BusClient {
        BusClient {
            bus: self.clone(),
            client_id: client_id.into(),
        }
    }

    /// Broadcast `message` on `channel`; returns the number of subscribers
    /// that received it.
    pub fn publish(&self, channel: &str, message: BusMessage) -> usize {
        match self.sender(channel).send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!(channel, "bus message published with no subscribers");
                0
            }
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<BusMessage> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn raw_subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage> {
        self.sender(channel).subscribe()
    }
}

/// Stream of bus messages addressed to one client.
pub struct Subscription {
    channel: String,
    client_id: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    /// Next message for this client, or `None` once the channel is gone.
    /// Messages for other clients are skipped.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if msg.client_id == self.client_id => return Some(msg),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "bus subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Client-scoped view of the bus.
#[derive(Clone, Debug)]
pub struct BusClient {
    bus: MessageBus,
    client_id: String,
}

impl BusClient {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn subscribe(&self, channel: &str) -> Subscription {
        Subscription {
            channel: channel.to_string(),
            client_id: self.client_id.clone(),
            rx: self.bus.raw_subscribe(channel),
        }
    }

    /// Fire-and-forget notification.
    pub fn post(&self, channel: &str, target: &str, data: Value) {
        self.bus.publish(
            channel,
            BusMessage {
                client_id: self.client_id.clone(),
                target: target.to_string(),
                data,
                request_id: None,
                kind: MessageKind::Notify,
            },
        );
    }

    /// Send a request and await the correlated response.
    ///
    /// The subscription is opened before the request is published so a fast
    /// responder cannot be missed.
    pub async fn request(
        &self,
        channel: &str,
        target: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, BusError> {
        let mut sub = self.subscribe(channel);
        let request_id = Uuid::new_v4();

        self.bus.publish(
            channel,
            BusMessage {
                client_id: self.client_id.clone(),
                target: target.to_string(),
                data,
                request_id: Some(request_id),
                kind: MessageKind::Request,
            },
        );
        tracing::debug!(channel, target, %request_id, "bus request sent");

        let reply = async {
            while let Some(msg) = sub.recv().await {
                if msg.kind == MessageKind::Response && msg.request_id == Some(request_id) {
                    return Ok(msg.data);
                }
            }
            Err(BusError::Closed(channel.to_string()))
        };

        match tokio::time::timeout(timeout, reply).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout {
                channel: channel.to_string(),
                target: target.to_string(),
                timeout,
            }),
        }
    }

    /// Answer every request for `target` on `channel` with `handler`.
    ///
    /// The subscription is taken before the task is spawned; the task ends
    /// when the channel closes or the handle is aborted.
    pub fn serve<F>(&self, channel: &str, target: &str, handler: F) -> JoinHandle<()>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let mut sub = self.subscribe(channel);
        let bus = self.bus.clone();
        let channel = channel.to_string();
        let target = target.to_string();

        tokio::spawn(async move {
            while let Some(msg) = sub.recv().await {
                if msg.kind != MessageKind::Request || msg.target != target {
                    continue;
                }
                let data = handler(&msg.data);
                bus.publish(
                    &channel,
                    BusMessage {
                        client_id: msg.client_id,
                        target: msg.target,
                        data,
                        request_id: msg.request_id,
                        kind: MessageKind::Response,
                    },
                );
            }
            tracing::debug!(channel = %channel, target = %target, "bus responder stopped");
        })
    }
}
