//! Storage lookups across execution contexts.
//!
//! A context without direct access to a storage kind (a service worker has
//! no `sessionStorage`, for instance) asks a peer context of the same client
//! over the message bus. A peer that does not answer in time is treated as
//! "no value".

use std::sync::Arc;
use std::time::Duration;

use host_bridge::BusClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::namespace::StorageKind;
use crate::namespacer::Namespacer;

/// Bus target for storage reads.
pub const STORAGE_GET: &str = "storage-get";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LookupRequest {
    kind: StorageKind,
    key: String,
}

/// Reads one storage kind through a peer context.
#[derive(Debug, Clone)]
pub struct RemoteStorage {
    client: BusClient,
    channel: String,
    kind: StorageKind,
    timeout: Duration,
}

impl RemoteStorage {
    pub fn new(
        client: BusClient,
        channel: impl Into<String>,
        kind: StorageKind,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            channel: channel.into(),
            kind,
            timeout,
        }
    }

    /// Fetch `key` from the peer. Timeouts and malformed replies yield `None`.
    pub async fn get_item(&self, key: &str) -> Option<String> {
        let request = LookupRequest {
            kind: self.kind,
            key: key.to_string(),
        };
        let data = match serde_json::to_value(&request) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "could not encode storage lookup");
                return None;
            }
        };

        match self
            .client
            .request(&self.channel, STORAGE_GET, data, self.timeout)
            .await
        {
            Ok(Value::String(value)) => Some(value),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(kind = %self.kind, key, %err, "remote storage lookup failed");
                None
            }
        }
    }
}

/// Answer [`STORAGE_GET`] requests for `client` from the given namespacers.
pub fn serve_lookups(
    client: &BusClient,
    channel: &str,
    namespacers: Vec<Arc<Namespacer>>,
) -> JoinHandle<()> {
    client.serve(channel, STORAGE_GET, move |data| {
        let Ok(request) = serde_json::from_value::<LookupRequest>(data.clone()) else {
            tracing::debug!(?data, "ignoring malformed storage lookup");
            return Value::Null;
        };
        namespacers
            .iter()
            .find(|ns| ns.namespace().kind() == request.kind)
            .and_then(|ns| ns.get_item(&request.key))
            .map(Value::String)
            .unwrap_or(Value::Null)
    })
}
