//! Namespaced key derivation.
//!
//! Persisted layout: `<kind>_<storeId>[_<sessionId>]_<realKey>`. Store and
//! session ids are escaped (`%` → `%25`, `_` → `%5F`) so the `_` separator
//! only ever appears between components and a derived key splits back
//! uniquely.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

const SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    IndexedDb,
    LocalStorage,
    SessionStorage,
    SharedStorage,
    Sql,
}

impl StorageKind {
    pub const ALL: [StorageKind; 5] = [
        StorageKind::IndexedDb,
        StorageKind::LocalStorage,
        StorageKind::SessionStorage,
        StorageKind::SharedStorage,
        StorageKind::Sql,
    ];

    /// Leading component of every derived key.
    pub fn prefix(self) -> &'static str {
        match self {
            StorageKind::IndexedDb => "idb",
            StorageKind::LocalStorage => "ls",
            StorageKind::SessionStorage => "ss",
            StorageKind::SharedStorage => "shs",
            StorageKind::Sql => "sql",
        }
    }

    /// Whether keys of this kind carry a session component.
    pub fn is_session_scoped(self) -> bool {
        matches!(self, StorageKind::SessionStorage)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Escape one id component so it never contains the separator.
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            SEPARATOR => out.push_str("%5F"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_component`]. Unknown `%` sequences are kept verbatim.
pub fn unescape_component(escaped: &str) -> String {
    escaped.replace("%5F", "_").replace("%25", "%")
}

/// Which slice of the shared backend one context may use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageNamespace {
    kind: StorageKind,
    store_id: String,
    session_id: Option<String>,
    prefix: String,
}

impl StorageNamespace {
    /// Session-scoped kinds require `session_id`; other kinds ignore it.
    pub fn new(
        kind: StorageKind,
        store_id: impl Into<String>,
        session_id: Option<&str>,
    ) -> Result<Self, StorageError> {
        let store_id = store_id.into();
        if store_id.is_empty() {
            return Err(StorageError::EmptyStoreId { kind });
        }

        let session_id = match (kind.is_session_scoped(), session_id) {
            (true, Some(s)) if !s.is_empty() => Some(s.to_string()),
            (true, _) => return Err(StorageError::MissingSession { kind }),
            (false, _) => None,
        };

        let mut prefix = format!("{}{SEPARATOR}{}{SEPARATOR}", kind.prefix(), escape_component(&store_id));
        if let Some(session) = &session_id {
            prefix.push_str(&escape_component(session));
            prefix.push(SEPARATOR);
        }

        Ok(Self {
            kind,
            store_id,
            session_id,
            prefix,
        })
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Everything a derived key starts with.
    pub fn key_prefix(&self) -> &str {
        &self.prefix
    }

    /// `<kind>_<store>_` without the session component.
    pub fn store_prefix(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}",
            self.kind.prefix(),
            escape_component(&self.store_id)
        )
    }
}

pub fn derive_key(namespace: &StorageNamespace, real_key: &str) -> String {
    format!("{}{}", namespace.key_prefix(), real_key)
}

/// Database names (IndexedDB, SQL) use the same layout as keys.
pub fn derive_name(namespace: &StorageNamespace, real_name: &str) -> String {
    derive_key(namespace, real_name)
}

/// The real key inside `namespaced_key`, or `None` when it belongs to
/// another namespace.
pub fn reverse_key(namespace: &StorageNamespace, namespaced_key: &str) -> Option<String> {
    namespaced_key
        .strip_prefix(namespace.key_prefix())
        .map(str::to_string)
}

/// Split the session component off a key that lives under `store_prefix`.
/// Returns the still-escaped session id.
pub(crate) fn session_component<'a>(store_prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(store_prefix)?;
    rest.split_once(SEPARATOR).map(|(session, _)| session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(kind: StorageKind, store: &str, session: Option<&str>) -> StorageNamespace {
        StorageNamespace::new(kind, store, session).unwrap()
    }

    #[test]
    fn derive_layout_per_kind() {
        assert_eq!(derive_key(&ns(StorageKind::LocalStorage, "S", None), "k"), "ls_S_k");
        assert_eq!(derive_key(&ns(StorageKind::IndexedDb, "S", None), "db"), "idb_S_db");
        assert_eq!(derive_key(&ns(StorageKind::SharedStorage, "S", None), "k"), "shs_S_k");
        assert_eq!(derive_key(&ns(StorageKind::Sql, "S", None), "k"), "sql_S_k");
        assert_eq!(
            derive_key(&ns(StorageKind::SessionStorage, "S", Some("T")), "k"),
            "ss_S_T_k"
        );
    }

    #[test]
    fn reverse_inverts_derive() {
        let n = ns(StorageKind::SessionStorage, "store_1", Some("sess%_2"));
        for key in ["k", "", "with_underscores_", "ss_store_1_x"] {
            assert_eq!(reverse_key(&n, &derive_key(&n, key)).as_deref(), Some(key));
        }
    }

    #[test]
    fn reverse_rejects_foreign_keys() {
        let n = ns(StorageKind::LocalStorage, "S", None);
        assert_eq!(reverse_key(&n, "ls_X_k"), None);
        assert_eq!(reverse_key(&n, "ss_S_T_k"), None);
        assert_eq!(reverse_key(&n, "unrelated"), None);
    }

    #[test]
    fn separator_in_ids_is_escaped() {
        let a = ns(StorageKind::LocalStorage, "a_b", None);
        let b = ns(StorageKind::LocalStorage, "a", None);
        assert_eq!(a.key_prefix(), "ls_a%5Fb_");
        assert_ne!(derive_key(&a, "k"), derive_key(&b, "b_k"));
        assert_eq!(reverse_key(&b, &derive_key(&a, "k")), None);
    }

    #[test]
    fn escape_round_trips() {
        for raw in ["", "plain", "a_b", "%5F", "100%_", "__"] {
            let escaped = escape_component(raw);
            assert!(!escaped.contains('_'));
            assert_eq!(unescape_component(&escaped), raw);
        }
    }

    #[test]
    fn session_kind_requires_session() {
        assert_eq!(
            StorageNamespace::new(StorageKind::SessionStorage, "S", None),
            Err(StorageError::MissingSession {
                kind: StorageKind::SessionStorage
            })
        );
        let ls = ns(StorageKind::LocalStorage, "S", Some("ignored"));
        assert_eq!(ls.session_id(), None);
        assert!(StorageNamespace::new(StorageKind::Sql, "", None).is_err());
    }

    #[test]
    fn session_component_is_extracted() {
        let n = ns(StorageKind::SessionStorage, "S", Some("T"));
        assert_eq!(session_component(&n.store_prefix(), "ss_S_T_k"), Some("T"));
        assert_eq!(session_component(&n.store_prefix(), "ss_S_noseparator"), None);
        assert_eq!(session_component(&n.store_prefix(), "ls_S_T_k"), None);
    }
}
