//! Shared data id → subscribed session ids lookup used for fan-out.

use std::collections::HashSet;

use dashmap::DashMap;

/// Which sessions listen to which data ids.
///
/// Holds session ids only; sessions are resolved through the
/// [`SessionRegistry`](super::registry::SessionRegistry). A session id is
/// present under a data id exactly while that session has a listener entry
/// for it; sessions maintain this while holding their own lock.
#[derive(Default)]
pub struct DataListenerIndex {
    listeners: DashMap<String, HashSet<String>>,
}

impl DataListenerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, data_id: &str, session_id: &str) {
        self.listeners
            .entry(data_id.to_string())
            .or_default()
            .insert(session_id.to_string());
    }

    /// Remove a session from a data id, dropping the data id once nobody
    /// listens to it anymore.
    pub fn unsubscribe(&self, data_id: &str, session_id: &str) {
        let now_empty = match self.listeners.get_mut(data_id) {
            Some(mut sessions) => {
                sessions.remove(session_id);
                sessions.is_empty()
            }
            None => return,
        };

        if now_empty {
            self.listeners.remove_if(data_id, |_, sessions| sessions.is_empty());
        }
    }

    /// Snapshot of the sessions listening to `data_id`.
    pub fn subscribers(&self, data_id: &str) -> Vec<String> {
        self.listeners
            .get(data_id)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, data_id: &str, session_id: &str) -> bool {
        self.listeners
            .get(data_id)
            .is_some_and(|sessions| sessions.contains(session_id))
    }

    /// Every data id with at least one subscriber.
    pub fn data_ids(&self) -> Vec<String> {
        self.listeners.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_a_set() {
        let index = DataListenerIndex::new();
        index.subscribe("d1", "s1");
        index.subscribe("d1", "s1");
        index.subscribe("d1", "s2");

        let mut subs = index.subscribers("d1");
        subs.sort();
        assert_eq!(subs, vec!["s1", "s2"]);
        assert!(index.is_subscribed("d1", "s2"));
    }

    #[test]
    fn unsubscribe_drops_empty_data_ids() {
        let index = DataListenerIndex::new();
        index.subscribe("d1", "s1");
        index.subscribe("d2", "s1");
        index.subscribe("d2", "s2");

        index.unsubscribe("d1", "s1");
        index.unsubscribe("d2", "s1");

        assert!(index.subscribers("d1").is_empty());
        assert_eq!(index.subscribers("d2"), vec!["s2"]);
        assert_eq!(index.data_ids(), vec!["d2"]);
    }

    #[test]
    fn unknown_ids_are_harmless() {
        let index = DataListenerIndex::new();
        index.unsubscribe("nope", "s1");
        assert!(index.subscribers("nope").is_empty());
        assert!(!index.is_subscribed("nope", "s1"));
        assert!(index.is_empty());
    }
}
