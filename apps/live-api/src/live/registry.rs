//! Session registry: creation on first contact, lookup, expiry and removal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use scenecast_common::random_token;

use crate::config::Config;
use crate::error::LiveError;

use super::client::ClientInfo;
use super::index::DataListenerIndex;
use super::menu::SessionMenu;
use super::session::{Session, SessionLinks};

/// Shared registry of all live sessions.
///
/// Uses `DashMap` for shard-level concurrency; each session guards its own
/// state with a `parking_lot::Mutex`.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    index: Arc<DataListenerIndex>,
    /// Sessions created and not yet removed.
    session_count: Arc<AtomicUsize>,
    discovery_id: String,
    postponed_max_age: Duration,
    session_ttl: Duration,
    menu: Option<Arc<dyn SessionMenu>>,
}

impl SessionRegistry {
    pub fn new(
        config: &Config,
        index: Arc<DataListenerIndex>,
        menu: Option<Arc<dyn SessionMenu>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            index,
            session_count: Arc::new(AtomicUsize::new(0)),
            discovery_id: config.discovery_id.clone(),
            postponed_max_age: config.postponed_max_age,
            session_ttl: config.session_ttl,
            menu,
        })
    }

    /// Create and register a session for a client making first contact.
    pub fn create(self: &Arc<Self>, client: ClientInfo) -> Arc<Session> {
        let id = format!("{}-{}", self.discovery_id, random_token());
        let menu_item = self.menu.as_ref().map(|menu| menu.add_item(&client.label()));

        let links = SessionLinks {
            index: self.index.clone(),
            registry: Arc::downgrade(self),
            session_count: self.session_count.clone(),
            postponed_max_age: self.postponed_max_age,
        };
        let session = Arc::new(Session::new(id.clone(), client, links, menu_item));
        self.sessions.insert(id, session.clone());

        tracing::info!(
            session_id = %session.id(),
            client = %session.client().label(),
            "session created"
        );

        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn require(&self, session_id: &str) -> Result<Arc<Session>, LiveError> {
        self.get(session_id)
            .ok_or_else(|| LiveError::SessionNotFound(session_id.to_string()))
    }

    /// Remove a session and run its teardown. Returns `false` if it was not
    /// registered.
    pub fn remove(&self, session_id: &str, expired: bool) -> bool {
        // Teardown runs after the map entry is released so callbacks may use
        // the registry.
        match self.sessions.remove(session_id) {
            Some((_, session)) => {
                session.removed(expired);
                true
            }
            None => false,
        }
    }

    /// Remove sessions idle longer than the configured TTL. Sessions with an
    /// attached scene are never idle.
    /// Returns the number of sessions removed.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.session_ttl;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.connection_count() == 0 && session.idle_time() >= ttl
            })
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|session_id| self.remove(session_id, true))
            .count()
    }

    /// Drop expired postponed requests across all sessions.
    pub fn evict_postponed(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().evict_postponed())
            .sum()
    }

    /// Remove every session (process teardown).
    pub fn clear(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.into_iter()
            .filter(|session_id| self.remove(session_id, false))
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn index(&self) -> &Arc<DataListenerIndex> {
        &self.index
    }
}
