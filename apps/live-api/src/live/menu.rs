//! Optional session listing ("session menu") integration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Something that can list live sessions, e.g. an operator console.
pub trait SessionMenu: Send + Sync {
    fn add_item(&self, label: &str) -> Box<dyn MenuItem>;
}

/// A single listed session. Removed when the session goes away.
pub trait MenuItem: Send + Sync {
    fn remove(&self);
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryMenu {
    items: Arc<DashMap<u64, String>>,
    next_key: AtomicU64,
}

impl MemoryMenu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels currently listed, in insertion order.
    pub fn labels(&self) -> Vec<String> {
        let mut items: Vec<(u64, String)> = self
            .items
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        items.sort_by_key(|(key, _)| *key);
        items.into_iter().map(|(_, label)| label).collect()
    }
}

impl SessionMenu for MemoryMenu {
    fn add_item(&self, label: &str) -> Box<dyn MenuItem> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.items.insert(key, label.to_string());
        Box::new(MemoryMenuItem {
            items: self.items.clone(),
            key,
        })
    }
}

struct MemoryMenuItem {
    items: Arc<DashMap<u64, String>>,
    key: u64,
}

impl MenuItem for MemoryMenuItem {
    fn remove(&self) {
        self.items.remove(&self.key);
    }
}
