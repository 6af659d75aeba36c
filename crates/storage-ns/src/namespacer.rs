use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fault_log::FaultSink;

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::namespace::{
    derive_key, escape_component, reverse_key, session_component, StorageNamespace,
};

const COMPONENT: &str = "storage-ns";

/// Namespaces claimed in this process, keyed by key prefix.
///
/// Share one table (behind an `Arc`) between every context that writes to the
/// same backend. Claiming the same namespace twice is allowed; claiming one
/// whose prefix overlaps a different claimed prefix is a collision.
#[derive(Debug, Default)]
pub struct ClaimTable {
    claims: Mutex<HashMap<String, StorageNamespace>>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, namespace: &StorageNamespace) -> Result<(), StorageError> {
        let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
        let prefix = namespace.key_prefix();

        if let Some((claimed, _)) = claims.iter().find(|(claimed, existing)| {
            *existing != namespace && (claimed.starts_with(prefix) || prefix.starts_with(claimed.as_str()))
        }) {
            return Err(StorageError::StorageNamespaceCollision {
                prefix: prefix.to_string(),
                claimed: claimed.clone(),
            });
        }

        claims.insert(prefix.to_string(), namespace.clone());
        Ok(())
    }

    pub fn release(&self, namespace: &StorageNamespace) {
        let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
        claims.remove(namespace.key_prefix());
    }

    pub fn len(&self) -> usize {
        self.claims.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Delete keys of `namespace`'s kind and store that belong to any session
/// other than the current one. Returns the number of keys removed.
///
/// Idempotent: a second call finds nothing to remove. Kinds without a session
/// component are left alone.
pub fn evict_stale_sessions(backend: &dyn StorageBackend, namespace: &StorageNamespace) -> usize {
    let Some(current) = namespace.session_id() else {
        return 0;
    };
    let current = escape_component(current);
    let store_prefix = namespace.store_prefix();

    let mut removed = 0;
    for key in backend.keys() {
        match session_component(&store_prefix, &key) {
            Some(session) if session != current => {
                if backend.remove(&key) {
                    removed += 1;
                }
            }
            _ => {}
        }
    }
    removed
}

/// One context's view of the shared backend.
pub struct Namespacer {
    namespace: StorageNamespace,
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for Namespacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespacer")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Namespacer {
    /// Claim `namespace` and clear out stale sessions.
    ///
    /// A collision is reported to `faults` and aborts construction.
    pub fn init(
        namespace: StorageNamespace,
        backend: Arc<dyn StorageBackend>,
        claims: &ClaimTable,
        faults: &FaultSink,
    ) -> Result<Self, StorageError> {
        if let Err(err) = claims.claim(&namespace) {
            faults.report(COMPONENT, "refusing to share storage keys between namespaces", Some(&err));
            return Err(err);
        }

        let evicted = evict_stale_sessions(backend.as_ref(), &namespace);
        tracing::info!(
            kind = %namespace.kind(),
            store = namespace.store_id(),
            session = namespace.session_id().unwrap_or(""),
            evicted,
            "storage namespace ready"
        );

        Ok(Self { namespace, backend })
    }

    pub fn namespace(&self) -> &StorageNamespace {
        &self.namespace
    }

    pub fn derive_key(&self, real_key: &str) -> String {
        derive_key(&self.namespace, real_key)
    }

    pub fn reverse_key(&self, namespaced_key: &str) -> Option<String> {
        reverse_key(&self.namespace, namespaced_key)
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.backend.get(&self.derive_key(key))
    }

    pub fn set_item(&self, key: &str, value: impl Into<String>) {
        self.backend.set(&self.derive_key(key), value.into());
    }

    pub fn remove_item(&self, key: &str) -> bool {
        self.backend.remove(&self.derive_key(key))
    }

    /// Real keys visible in this namespace, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .backend
            .keys()
            .iter()
            .filter_map(|k| self.reverse_key(k))
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key of this namespace and nothing else.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for key in self.backend.keys() {
            if self.reverse_key(&key).is_some() && self.backend.remove(&key) {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::namespace::StorageKind;

    fn session_ns(session: &str) -> StorageNamespace {
        StorageNamespace::new(StorageKind::SessionStorage, "S", Some(session)).unwrap()
    }

    #[test]
    fn stale_sessions_are_evicted_once() {
        let backend = MemoryBackend::new();
        backend.set("ss_S_old_a", "1".into());
        backend.set("ss_S_old_b", "2".into());
        backend.set("ss_S_cur_c", "3".into());
        backend.set("ls_S_d", "4".into());
        backend.set("ss_Other_old_e", "5".into());

        let ns = session_ns("cur");
        assert_eq!(evict_stale_sessions(&backend, &ns), 2);
        assert_eq!(evict_stale_sessions(&backend, &ns), 0);

        let mut left = backend.keys();
        left.sort();
        assert_eq!(left, vec!["ls_S_d", "ss_Other_old_e", "ss_S_cur_c"]);
    }

    #[test]
    fn non_session_kinds_skip_cleanup() {
        let backend = MemoryBackend::new();
        backend.set("ls_S_a", "1".into());
        let ns = StorageNamespace::new(StorageKind::LocalStorage, "S", None).unwrap();
        assert_eq!(evict_stale_sessions(&backend, &ns), 0);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn namespaced_item_access() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let claims = ClaimTable::new();
        let faults = FaultSink::tracing_only();

        let ls = Namespacer::init(
            StorageNamespace::new(StorageKind::LocalStorage, "S", None).unwrap(),
            Arc::clone(&backend),
            &claims,
            &faults,
        )
        .unwrap();
        let ss = Namespacer::init(session_ns("T"), Arc::clone(&backend), &claims, &faults).unwrap();

        ls.set_item("theme", "dark");
        ss.set_item("theme", "light");
        assert_eq!(ls.get_item("theme").as_deref(), Some("dark"));
        assert_eq!(ss.get_item("theme").as_deref(), Some("light"));
        assert_eq!(backend.get("ls_S_theme").as_deref(), Some("dark"));
        assert_eq!(ls.keys(), vec!["theme"]);

        assert_eq!(ls.clear(), 1);
        assert!(ls.is_empty());
        assert_eq!(ss.len(), 1);
        assert!(ss.remove_item("theme"));
    }

    #[test]
    fn reclaiming_same_namespace_is_allowed() {
        let claims = ClaimTable::new();
        claims.claim(&session_ns("T")).unwrap();
        claims.claim(&session_ns("T")).unwrap();
        assert_eq!(claims.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_prefix_is_fatal_collision() {
        let claims = ClaimTable::new();
        let (faults, mut rx) = FaultSink::channel();
        let a = StorageNamespace::new(StorageKind::LocalStorage, "S", None).unwrap();
        claims.claim(&a).unwrap();

        // Only reachable by bypassing escaping; the table must still refuse.
        let mut table = claims.claims.lock().unwrap();
        let forged = StorageNamespace::new(StorageKind::LocalStorage, "S_x", None).unwrap();
        table.insert("ls_S_x_".to_string(), forged);
        drop(table);

        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let err = Namespacer::init(a.clone(), backend, &claims, &faults).unwrap_err();
        assert!(matches!(err, StorageError::StorageNamespaceCollision { .. }));

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.component, "storage-ns");
        assert_eq!(entry.severity, fault_log::Severity::Fatal);
    }

    #[test]
    fn release_frees_the_prefix() {
        let claims = ClaimTable::new();
        let ns = session_ns("T");
        claims.claim(&ns).unwrap();
        claims.release(&ns);
        assert!(claims.is_empty());
    }
}
