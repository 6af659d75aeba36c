use thiserror::Error;

use crate::namespace::StorageKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Two distinct namespaces would share derived keys. Never expected when
    /// store and session ids are escaped; treated as fatal.
    #[error("storage namespace collision: `{prefix}` overlaps already-claimed `{claimed}`")]
    StorageNamespaceCollision { prefix: String, claimed: String },

    #[error("{kind:?} is session-scoped and needs a session id")]
    MissingSession { kind: StorageKind },

    #[error("store id for {kind:?} is empty")]
    EmptyStoreId { kind: StorageKind },
}
