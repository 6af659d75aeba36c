//! # storage-ns
//!
//! Every proxied site shares one physical storage backend with every other
//! site served through the same proxy origin. This crate carves that backend
//! into per-site, per-session namespaces:
//!
//! ```text
//! <kind>_<storeId>[_<sessionId>]_<realKey>
//!   idb | ls | ss | shs | sql
//! ```
//!
//! Only `sessionStorage` (`ss`) carries a session component. Ids are escaped
//! before concatenation so every derived key reverses to exactly one
//! namespace.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use fault_log::FaultSink;
//! use storage_ns::{ClaimTable, MemoryBackend, Namespacer, StorageKind, StorageNamespace};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let ns = StorageNamespace::new(StorageKind::LocalStorage, "site-a", None).unwrap();
//! let store = Namespacer::init(ns, backend, &ClaimTable::new(), &FaultSink::tracing_only()).unwrap();
//!
//! store.set_item("theme", "dark");
//! assert_eq!(store.derive_key("theme"), "ls_site-a_theme");
//! assert_eq!(store.get_item("theme").as_deref(), Some("dark"));
//! ```

pub mod backend;
mod error;
pub mod namespace;
pub mod namespacer;
pub mod remote;

pub use backend::{MemoryBackend, StorageBackend};
pub use error::StorageError;
pub use namespace::{derive_key, derive_name, reverse_key, StorageKind, StorageNamespace};
pub use namespacer::{evict_stale_sessions, ClaimTable, Namespacer};
pub use remote::{serve_lookups, RemoteStorage, STORAGE_GET};
