//! Capabilities the rewriting core consumes from its host.
//!
//! Neither of these is implemented by the core itself; the embedding
//! environment supplies them and every other crate talks to them only
//! through the types here.
//!
//! # Architecture
//!
//! ```text
//! window ─┐                       ┌─ service worker
//!         ├── MessageBus (named ──┤
//! worker ─┘   broadcast channels) └─ shared worker
//!
//! csp-policy / descriptors ──> dyn Fetcher ──> host network
//! ```
//!
//! Bus traffic is JSON-shaped ([`BusMessage`]) and filtered by `clientId`.
//! Request/response exchanges are correlated by request id and always carry
//! a timeout.

pub mod bus;
pub mod fetch;

pub use bus::{BusClient, BusError, BusMessage, MessageBus, MessageKind, Subscription};
pub use fetch::{FetchError, FetchRequest, FetchResponse, Fetcher, StaticFetcher};
