//! Key/value collaborator.
//!
//! The reactor and pool never touch the store. It exists so application
//! task bodies can keep per-connection state between events without a
//! global. Implementations must be internally synchronized.

use std::collections::HashMap;
use std::sync::Mutex;

/// String key/value store shared by application tasks.
///
/// **Contract:**
/// - All methods take `&self`; the store synchronizes itself.
/// - `remove()` returns how many entries were removed (0 or 1 for a
///   plain map).
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String);

    fn remove(&self, key: &str) -> usize;
}

/// `HashMap` behind a `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.with_map(|m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_map<R>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> R) -> R {
        let mut guard = match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.with_map(|m| m.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) {
        self.with_map(|m| {
            m.insert(key.to_string(), value);
        });
    }

    fn remove(&self, key: &str) -> usize {
        self.with_map(|m| usize::from(m.remove(key).is_some()))
    }
}
