use dashmap::DashMap;

/// A flat string key-value store shared by every context of one origin.
///
/// Implementations must make `set` idempotent and `remove` delete by exact
/// key; concurrent contexts rely on nothing stronger.
pub trait StorageBackend: Send + Sync {
    fn keys(&self) -> Vec<String>;
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    /// Returns whether the key existed.
    fn remove(&self, key: &str) -> bool;
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_basic_ops() {
        let b = MemoryBackend::new();
        assert!(b.is_empty());
        b.set("a", "1".into());
        b.set("a", "2".into());
        assert_eq!(b.get("a").as_deref(), Some("2"));
        assert_eq!(b.keys(), vec!["a".to_string()]);
        assert!(b.remove("a"));
        assert!(!b.remove("a"));
        assert_eq!(b.len(), 0);
    }
}
